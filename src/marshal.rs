//! 协调线程消息派发
//!
//! 所有共享状态只属于一个协调线程。其他线程把要执行的动作封装成消息，
//! 投递到协调线程的队列中：
//! - `post`: 投递后立即返回（同一生产者保持 FIFO）
//! - `send`: 阻塞当前工作线程，直到协调线程执行完动作并返回结果
//! - `request`: `send` 的异步版本，供运行在 tokio 运行时中的调用方使用
//!
//! 协调线程逐条执行消息，单条动作 panic 只记录日志，不影响后续消息

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// 在协调线程上执行的动作
pub type MainAction<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// 派发错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// 协调线程已退出
    #[error("协调线程已关闭")]
    Closed,
    /// 动作未产生结果（执行中 panic）
    #[error("协调线程未返回结果")]
    Dropped,
    /// 在协调线程内部阻塞等待自身
    #[error("不能在协调线程内同步等待协调线程")]
    Reentrant,
}

/// 队列消息
enum Envelope<C> {
    Run(MainAction<C>),
    Shutdown,
}

/// 消息派发器（可克隆，跨线程共享）
pub struct Marshaler<C> {
    tx: mpsc::UnboundedSender<Envelope<C>>,
    owner: Arc<OnceLock<ThreadId>>,
}

impl<C> Clone for Marshaler<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            owner: Arc::clone(&self.owner),
        }
    }
}

impl<C> std::fmt::Debug for Marshaler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marshaler")
            .field("closed", &self.tx.is_closed())
            .field("owner", &self.owner.get())
            .finish()
    }
}

/// 协调线程的消费端
pub struct MainLoop<C> {
    rx: mpsc::UnboundedReceiver<Envelope<C>>,
    owner: Arc<OnceLock<ThreadId>>,
}

impl<C: 'static> Marshaler<C> {
    /// 创建派发器及其消费端
    pub fn channel() -> (Marshaler<C>, MainLoop<C>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let owner = Arc::new(OnceLock::new());
        (
            Marshaler {
                tx,
                owner: Arc::clone(&owner),
            },
            MainLoop { rx, owner },
        )
    }

    /// 投递动作，不等待执行
    pub fn post<F>(&self, action: F) -> Result<(), MarshalError>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.tx
            .send(Envelope::Run(Box::new(action)))
            .map_err(|_| MarshalError::Closed)
    }

    /// 投递动作并阻塞当前线程等待结果
    ///
    /// 只能在协调线程以外的普通线程中调用（不能在 tokio 异步上下文中调用）
    pub fn send<F, R>(&self, action: F) -> Result<R, MarshalError>
    where
        F: FnOnce(&mut C) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_coordinator_thread() {
            return Err(MarshalError::Reentrant);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move |context| {
            let _ = reply_tx.send(action(context));
        })?;
        reply_rx.blocking_recv().map_err(|_| MarshalError::Dropped)
    }

    /// 投递动作并异步等待结果
    pub async fn request<F, R>(&self, action: F) -> Result<R, MarshalError>
    where
        F: FnOnce(&mut C) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move |context| {
            let _ = reply_tx.send(action(context));
        })?;
        reply_rx.await.map_err(|_| MarshalError::Dropped)
    }

    /// 请求协调线程在处理完已排队消息后退出
    pub fn shutdown(&self) -> Result<(), MarshalError> {
        self.tx
            .send(Envelope::Shutdown)
            .map_err(|_| MarshalError::Closed)
    }

    /// 当前线程是否为协调线程
    pub fn is_coordinator_thread(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<C: Send + 'static> MainLoop<C> {
    /// 在新线程上启动协调循环，线程结束时返回上下文
    pub fn spawn(self, name: &str, context: C) -> io::Result<JoinHandle<C>> {
        let name = name.to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(&name, context))
    }

    fn run(mut self, name: &str, mut context: C) -> C {
        let _ = self.owner.set(thread::current().id());
        info!("协调线程已启动: {}", name);

        let mut processed: u64 = 0;
        while let Some(envelope) = self.rx.blocking_recv() {
            match envelope {
                Envelope::Run(action) => {
                    processed += 1;
                    let result = panic::catch_unwind(AssertUnwindSafe(|| action(&mut context)));
                    if let Err(payload) = result {
                        error!("协调线程动作执行异常: {}", panic_message(payload.as_ref()));
                    }
                }
                Envelope::Shutdown => {
                    debug!("协调线程收到关闭请求");
                    break;
                }
            }
        }

        info!("协调线程已退出: {}, 共处理 {} 条消息", name, processed);
        context
    }
}

/// 提取 panic 信息
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_counter() -> (Marshaler<Vec<u32>>, JoinHandle<Vec<u32>>) {
        let (marshaler, main_loop) = Marshaler::channel();
        let handle = main_loop.spawn("test-coordinator", Vec::new()).unwrap();
        (marshaler, handle)
    }

    #[test]
    fn test_post_preserves_order() {
        let (marshaler, handle) = spawn_counter();
        for i in 0..100 {
            marshaler.post(move |log: &mut Vec<u32>| log.push(i)).unwrap();
        }
        marshaler.shutdown().unwrap();

        let log = handle.join().unwrap();
        assert_eq!(log, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_send_blocks_for_result() {
        let (marshaler, handle) = spawn_counter();
        marshaler.post(|log: &mut Vec<u32>| log.push(7)).unwrap();

        let len = marshaler.send(|log: &mut Vec<u32>| log.len()).unwrap();
        assert_eq!(len, 1);

        marshaler.shutdown().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_send_from_coordinator_thread_is_rejected() {
        let (marshaler, handle) = spawn_counter();
        let inner = marshaler.clone();
        let result = marshaler
            .send(move |_log: &mut Vec<u32>| inner.send(|log: &mut Vec<u32>| log.len()))
            .unwrap();
        assert_eq!(result, Err(MarshalError::Reentrant));

        marshaler.shutdown().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_panicking_action_does_not_stop_loop() {
        let (marshaler, handle) = spawn_counter();

        let result = marshaler.send(|_log: &mut Vec<u32>| -> usize { panic!("boom") });
        assert_eq!(result, Err(MarshalError::Dropped));

        let len = marshaler.send(|log: &mut Vec<u32>| {
            log.push(1);
            log.len()
        });
        assert_eq!(len, Ok(1));

        marshaler.shutdown().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_closed_after_shutdown() {
        let (marshaler, handle) = spawn_counter();
        marshaler.shutdown().unwrap();
        handle.join().unwrap();

        assert_eq!(marshaler.post(|_log: &mut Vec<u32>| {}), Err(MarshalError::Closed));
        assert_eq!(marshaler.send(|log: &mut Vec<u32>| log.len()), Err(MarshalError::Closed));
    }

    #[tokio::test]
    async fn test_request_from_async_context() {
        let (marshaler, handle) = spawn_counter();
        marshaler.post(|log: &mut Vec<u32>| log.extend([1, 2, 3])).unwrap();

        let sum = marshaler
            .request(|log: &mut Vec<u32>| log.iter().sum::<u32>())
            .await
            .unwrap();
        assert_eq!(sum, 6);

        marshaler.shutdown().unwrap();
        tokio::task::spawn_blocking(move || handle.join().unwrap())
            .await
            .unwrap();
    }
}
