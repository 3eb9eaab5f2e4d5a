//! Lua scripts for the multi-key state transitions that must be atomic.

use std::sync::LazyLock;

use redis::Script;

/// KEYS: job, wait, delayed. ARGV: id, record, runnable-at (0 = now).
/// Returns 0 when the job id already exists.
pub static ADD_JOB: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[2])
        local ready = tonumber(ARGV[3])
        if ready > 0 then
            redis.call('ZADD', KEYS[3], ready, ARGV[1])
        else
            redis.call('RPUSH', KEYS[2], ARGV[1])
        end
        return 1
        ",
    )
});

/// KEYS: wait, delayed, active. ARGV: now, lease deadline, job key prefix.
/// Promotes due delayed jobs, then leases the head of `wait`.
/// Returns `{id, record}` or nil.
pub static TAKE_NEXT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 100)
        for _, id in ipairs(due) do
            redis.call('ZREM', KEYS[2], id)
            redis.call('RPUSH', KEYS[1], id)
        end
        while true do
            local id = redis.call('LPOP', KEYS[1])
            if not id then
                return false
            end
            local record = redis.call('GET', ARGV[3] .. id)
            if record then
                redis.call('ZADD', KEYS[3], ARGV[2], id)
                return {id, record}
            end
        end
        ",
    )
});

/// KEYS: active, finished list, job. ARGV: id, record, keep (-1 = all), job key prefix.
/// Moves a job out of `active` into `completed`/`failed`, trimming old entries.
pub static FINISH_JOB: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        redis.call('ZREM', KEYS[1], ARGV[1])
        local keep = tonumber(ARGV[3])
        if keep == 0 then
            redis.call('DEL', KEYS[3])
            return 0
        end
        redis.call('SET', KEYS[3], ARGV[2])
        redis.call('LREM', KEYS[2], 0, ARGV[1])
        redis.call('LPUSH', KEYS[2], ARGV[1])
        if keep > 0 then
            while redis.call('LLEN', KEYS[2]) > keep do
                local old = redis.call('RPOP', KEYS[2])
                redis.call('DEL', ARGV[4] .. old)
            end
        end
        return 1
        ",
    )
});

/// KEYS: active, delayed, job. ARGV: id, record, runnable-at.
pub static RETRY_JOB: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        redis.call('ZREM', KEYS[1], ARGV[1])
        redis.call('SET', KEYS[3], ARGV[2])
        redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
        return 1
        ",
    )
});

/// KEYS: active, wait. ARGV: now. Requeues jobs whose lease expired.
pub static RECOVER_STALLED: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
        for _, id in ipairs(ids) do
            redis.call('ZREM', KEYS[1], id)
            redis.call('RPUSH', KEYS[2], id)
        end
        return #ids
        ",
    )
});

/// KEYS: repeat hash. ARGV: field, expected value, replacement.
/// Compare-and-set so only one scheduler advances a repeat slot.
pub static ADVANCE_REPEAT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
            redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
            return 1
        end
        return 0
        ",
    )
});
