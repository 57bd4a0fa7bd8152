//! 回调关联器：把异步到达的外部结果交给正在等待该关联键的任务
//!
//! 一个键在任一时刻只处于一种状态：有等待者 / 已到达但无人认领 / 已解析（墓碑）。
//! 结果通过 oneshot 交给等待者，投递方不直接修改等待者的状态，因此可以在任意线程调用。
//! 一把互斥锁保护整张表，锁内不 await。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;

/// 等待失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// 超时内没有收到结果（与工具失败不同：结果未知）
    #[error("No callback for {key} within {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    /// 同一个键上有新的等待者，旧的等待被取消
    #[error("Wait on {0} was superseded by a newer waiter")]
    Superseded(String),

    /// 外部投递的是错误
    #[error("Callback reported failure: {0}")]
    Failed(String),
}

/// 一次投递的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 唤醒了正在等待的任务
    Resolved,
    /// 暂无等待者，结果已保存，之后的 wait 会立即拿到
    Stored,
    /// 重复或迟到的投递，被忽略
    Ignored,
}

/// 等待的结果
pub type Outcome<T> = Result<T, CallbackError>;

enum Slot<T> {
    Waiting {
        generation: u64,
        tx: oneshot::Sender<Outcome<T>>,
    },
    Stored {
        value: Result<T, String>,
        at: Instant,
    },
    Resolved {
        at: Instant,
    },
}

impl<T> Slot<T> {
    fn has_live_waiter(&self) -> bool {
        matches!(self, Slot::Waiting { tx, .. } if !tx.is_closed())
    }
}

struct Slots<T> {
    map: HashMap<String, Slot<T>>,
    next_generation: u64,
}

pub struct CallbackCorrelator<T> {
    slots: Mutex<Slots<T>>,
    /// 未被认领的结果保留多久
    retention: Duration,
    /// 已解析键的墓碑保留多久（期间重复投递被忽略）
    resolved_ttl: Duration,
}

impl<T: Send + 'static> CallbackCorrelator<T> {
    pub fn new(retention: Duration, resolved_ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                next_generation: 0,
            }),
            retention,
            resolved_ttl,
        }
    }

    /// 等待 key 的结果：已到达则立即返回；否则挂起直到投递或超时
    pub async fn wait(&self, key: &str, timeout: Duration) -> Outcome<T> {
        let (generation, mut rx) = {
            let mut slots = self.lock();
            self.purge_locked(&mut slots);

            match slots.map.remove(key) {
                Some(Slot::Stored { value, .. }) => {
                    tracing::debug!(key, "Consumed stored callback");
                    slots
                        .map
                        .insert(key.to_string(), Slot::Resolved { at: Instant::now() });
                    return value.map_err(CallbackError::Failed);
                }
                Some(Slot::Waiting { tx, .. }) => {
                    tracing::debug!(key, "Replacing existing waiter");
                    let _ = tx.send(Err(CallbackError::Superseded(key.to_string())));
                }
                Some(Slot::Resolved { .. }) | None => {}
            }

            let generation = slots.next_generation;
            slots.next_generation += 1;
            let (tx, rx) = oneshot::channel();
            slots
                .map
                .insert(key.to_string(), Slot::Waiting { generation, tx });
            (generation, rx)
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            // 发送端未发送即被丢弃
            Ok(Err(_)) => Err(CallbackError::Superseded(key.to_string())),
            Err(_) => {
                let mut slots = self.lock();
                let ours = matches!(
                    slots.map.get(key),
                    Some(Slot::Waiting { generation: g, .. }) if *g == generation
                );
                if ours {
                    slots.map.remove(key);
                    tracing::debug!(key, "Waiter timed out");
                    return Err(CallbackError::Timeout {
                        key: key.to_string(),
                        timeout,
                    });
                }
                drop(slots);
                // 超时与投递同时发生：投递方已经取走了我们的登记，结果在通道里
                rx.try_recv().unwrap_or_else(|_| {
                    Err(CallbackError::Timeout {
                        key: key.to_string(),
                        timeout,
                    })
                })
            }
        }
    }

    /// 投递成功结果
    pub fn deliver(&self, key: &str, value: T) -> Delivery {
        self.deliver_outcome(key, Ok(value))
    }

    /// 投递错误；等待者收到 CallbackError::Failed
    pub fn deliver_error(&self, key: &str, message: impl Into<String>) -> Delivery {
        self.deliver_outcome(key, Err(message.into()))
    }

    fn deliver_outcome(&self, key: &str, value: Result<T, String>) -> Delivery {
        let mut slots = self.lock();
        self.purge_locked(&mut slots);

        match slots.map.remove(key) {
            Some(Slot::Waiting { tx, .. }) => match tx.send(value.map_err(CallbackError::Failed)) {
                Ok(()) => {
                    slots
                        .map
                        .insert(key.to_string(), Slot::Resolved { at: Instant::now() });
                    tracing::debug!(key, "Callback resolved waiter");
                    Delivery::Resolved
                }
                Err(returned) => {
                    // 等待者已经离开，保存结果
                    let value = returned.map_err(|e| match e {
                        CallbackError::Failed(m) => m,
                        other => other.to_string(),
                    });
                    slots.map.insert(
                        key.to_string(),
                        Slot::Stored {
                            value,
                            at: Instant::now(),
                        },
                    );
                    Delivery::Stored
                }
            },
            Some(existing @ (Slot::Stored { .. } | Slot::Resolved { .. })) => {
                slots.map.insert(key.to_string(), existing);
                tracing::debug!(key, "Duplicate callback ignored");
                Delivery::Ignored
            }
            None => {
                slots.map.insert(
                    key.to_string(),
                    Slot::Stored {
                        value,
                        at: Instant::now(),
                    },
                );
                tracing::debug!(key, "Callback stored for a later waiter");
                Delivery::Stored
            }
        }
    }

    /// 清理过期的未认领结果与墓碑
    pub fn purge_expired(&self) {
        let mut slots = self.lock();
        self.purge_locked(&mut slots);
    }

    /// 当前等待中的键数量（等待方已被取消的不计）
    pub fn pending_count(&self) -> usize {
        self.lock().map.values().filter(|s| s.has_live_waiter()).count()
    }

    /// 已到达但未被认领的结果数量
    pub fn stored_count(&self) -> usize {
        self.lock()
            .map
            .values()
            .filter(|s| matches!(s, Slot::Stored { .. }))
            .count()
    }

    pub fn is_waiting(&self, key: &str) -> bool {
        self.lock()
            .map
            .get(key)
            .is_some_and(Slot::has_live_waiter)
    }

    fn purge_locked(&self, slots: &mut Slots<T>) {
        let now = Instant::now();
        let (retention, resolved_ttl) = (self.retention, self.resolved_ttl);
        slots.map.retain(|_, slot| match slot {
            // wait 的 future 被丢弃（如客户端断开）后接收端随之关闭
            Slot::Waiting { tx, .. } => !tx.is_closed(),
            Slot::Stored { at, .. } => now.duration_since(*at) < retention,
            Slot::Resolved { at } => now.duration_since(*at) < resolved_ttl,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
