/// Redis key layout for one named queue.
///
/// ```text
/// <prefix>:<queue>:id          INCR counter for generated job ids
/// <prefix>:<queue>:job:<id>    job record (JSON string)
/// <prefix>:<queue>:wait        list of runnable job ids
/// <prefix>:<queue>:delayed     zset, score = runnable-at (ms)
/// <prefix>:<queue>:active      zset, score = lease deadline (ms)
/// <prefix>:<queue>:completed   list, newest first
/// <prefix>:<queue>:failed      list, newest first
/// <prefix>:<queue>:repeat      hash, repeat key -> definition
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    queue: String,
    base: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            base: format!("{}:{}", prefix, queue),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn id_counter(&self) -> String {
        format!("{}:id", self.base)
    }

    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.base)
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.base, id)
    }

    pub fn wait(&self) -> String {
        format!("{}:wait", self.base)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.base)
    }

    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    pub fn completed(&self) -> String {
        format!("{}:completed", self.base)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.base)
    }

    pub fn repeat(&self) -> String {
        format!("{}:repeat", self.base)
    }
}
