//! 有界并发任务调度器
//!
//! 所有簿记（队列、在途表、计数器）只在调用方的控制流里修改；任务本身
//! 被 spawn 到运行时上，完成后通过 channel 把结果送回来。

use crate::core::task::{Finished, Task, TaskId, TaskKind, TaskOutput, TaskResult};
use crate::core::file::FileName;
use crate::error::SyncError;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 调度器向控制流报告的事件
#[derive(Debug)]
pub enum SchedulerEvent<C> {
    Finished(Finished<C>),
    /// 任务超过时限；任务继续占用并发槽直到真正完成
    TimedOut {
        id: TaskId,
        kind: TaskKind,
        label: String,
        timeout: Duration,
    },
}

enum Signal {
    Done(TaskId, TaskResult),
    Expired(TaskId),
}

struct InFlight<C> {
    kind: TaskKind,
    file: Option<FileName>,
    label: String,
    then: C,
    watchdog: Option<JoinHandle<()>>,
    dispatched_at: Instant,
}

struct Queued<C> {
    id: TaskId,
    task: Task<C>,
}

pub struct Scheduler<C> {
    limit: usize,
    timeout: Option<Duration>,
    dry_run: bool,
    next_id: TaskId,
    queue: VecDeque<Queued<C>>,
    in_flight: HashMap<TaskId, InFlight<C>>,
    active: usize,
    finalized: bool,
    tx: mpsc::UnboundedSender<Signal>,
    rx: mpsc::UnboundedReceiver<Signal>,
}

impl<C> Scheduler<C> {
    pub fn new(limit: usize, timeout: Option<Duration>, dry_run: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            limit: limit.max(1),
            timeout,
            dry_run,
            next_id: 0,
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            active: 0,
            finalized: false,
            tx,
            rx,
        }
    }

    /// 入队并尝试派发
    pub fn submit(&mut self, task: Task<C>) -> TaskId {
        self.next_id += 1;
        let id = self.next_id;
        debug!("提交任务 #{} {} {}", id, task.kind, task.label);
        self.queue.push_back(Queued { id, task });
        self.dispatch();
        id
    }

    /// 在并发上限内按 FIFO 派发排队的任务
    pub fn dispatch(&mut self) {
        while self.active < self.limit {
            let Some(Queued { id, task }) = self.queue.pop_front() else {
                break;
            };
            let Task {
                kind,
                file,
                label,
                work,
                then,
            } = task;

            let work = if self.dry_run && !kind.is_read_only() {
                debug!("模拟运行，跳过 #{} {} {}", id, kind, label);
                drop(work);
                futures::future::ready(Ok(TaskOutput::DryRun)).boxed()
            } else {
                work
            };

            let tx = self.tx.clone();
            tokio::spawn(async move {
                let result = match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::transport(
                        format!("task #{id}"),
                        "task panicked",
                    )),
                };
                let _ = tx.send(Signal::Done(id, result));
            });

            let watchdog = self.timeout.map(|timeout| {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(Signal::Expired(id));
                })
            });

            self.active += 1;
            self.in_flight.insert(
                id,
                InFlight {
                    kind,
                    file,
                    label,
                    then,
                    watchdog,
                    dispatched_at: Instant::now(),
                },
            );
        }
    }

    /// 等待下一个完成或超时事件；没有在途任务时返回 None
    pub async fn next_event(&mut self) -> Option<SchedulerEvent<C>> {
        while !self.in_flight.is_empty() {
            let signal = self.rx.recv().await?;
            match signal {
                Signal::Expired(id) => {
                    let Some(task) = self.in_flight.get(&id) else {
                        continue;
                    };
                    let timeout = self.timeout.unwrap_or_default();
                    warn!("任务 #{} {} {} 超时 ({:?})", id, task.kind, task.label, timeout);
                    return Some(SchedulerEvent::TimedOut {
                        id,
                        kind: task.kind,
                        label: task.label.clone(),
                        timeout,
                    });
                }
                Signal::Done(id, result) => {
                    let Some(task) = self.in_flight.remove(&id) else {
                        continue;
                    };
                    if let Some(watchdog) = task.watchdog {
                        watchdog.abort();
                    }
                    self.active -= 1;
                    debug!(
                        "任务 #{} {} {} 完成，用时 {:?}{}",
                        id,
                        task.kind,
                        task.label,
                        task.dispatched_at.elapsed(),
                        if result.is_err() { " (失败)" } else { "" }
                    );
                    return Some(SchedulerEvent::Finished(Finished {
                        id,
                        kind: task.kind,
                        file: task.file,
                        label: task.label,
                        then: task.then,
                        result: result.map(TaskOutput::normalized),
                    }));
                }
            }
        }
        None
    }

    /// 声明不再提交新任务（在途任务的后续任务仍然允许）
    pub fn finalize(&mut self) {
        debug!("调度器进入收尾阶段");
        self.finalized = true;
        self.dispatch();
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// 收尾已声明、队列为空且没有执行中的任务
    pub fn is_complete(&self) -> bool {
        self.finalized && self.queue.is_empty() && self.active == 0
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    async fn drain(scheduler: &mut Scheduler<usize>) -> Vec<Finished<usize>> {
        let mut done = Vec::new();
        while let Some(event) = scheduler.next_event().await {
            if let SchedulerEvent::Finished(f) = event {
                done.push(f);
            }
            scheduler.dispatch();
        }
        done
    }

    #[tokio::test]
    async fn tasks_start_in_submission_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(1, None, false);

        for n in 0..5usize {
            let order = order.clone();
            let work = async move {
                order.lock().unwrap().push(n);
                Ok(TaskOutput::Removed)
            }
            .boxed();
            scheduler.submit(Task::new(TaskKind::Walk, format!("t{n}"), work, n));
        }
        scheduler.finalize();

        let done = drain(&mut scheduler).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(done.iter().map(|f| f.then).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(scheduler.is_complete());
    }

    #[tokio::test]
    async fn never_exceeds_the_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(3, None, false);

        for n in 0..12usize {
            let current = current.clone();
            let peak = peak.clone();
            let work = async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(TaskOutput::Removed)
            }
            .boxed();
            scheduler.submit(Task::new(TaskKind::Send, "x", work, n));
            assert!(scheduler.active() <= 3);
        }
        assert_eq!(scheduler.queued(), 9);
        scheduler.finalize();

        let done = drain(&mut scheduler).await;
        assert_eq!(done.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test]
    async fn timeout_warns_without_freeing_the_slot() {
        let mut scheduler = Scheduler::new(1, Some(Duration::from_millis(10)), false);
        let slow = async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(TaskOutput::Removed)
        }
        .boxed();
        scheduler.submit(Task::new(TaskKind::Walk, "slow", slow, 0));
        scheduler.submit(Task::new(
            TaskKind::Walk,
            "next",
            async { Ok(TaskOutput::Removed) }.boxed(),
            1,
        ));

        match scheduler.next_event().await {
            Some(SchedulerEvent::TimedOut { label, .. }) => assert_eq!(label, "slow"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(scheduler.active(), 1);
        assert_eq!(scheduler.queued(), 1);

        match scheduler.next_event().await {
            Some(SchedulerEvent::Finished(f)) => assert_eq!(f.then, 0),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_replaces_mutating_work() {
        let touched = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(4, None, true);

        for kind in [TaskKind::Send, TaskKind::Walk] {
            let touched = touched.clone();
            let work = async move {
                touched.fetch_add(1, Ordering::SeqCst);
                Ok(TaskOutput::Removed)
            }
            .boxed();
            scheduler.submit(Task::new(kind, kind.as_str(), work, 0));
        }
        scheduler.finalize();

        let done = drain(&mut scheduler).await;
        let send = done.iter().find(|f| f.kind == TaskKind::Send).unwrap();
        let walk = done.iter().find(|f| f.kind == TaskKind::Walk).unwrap();
        assert_eq!(send.result, Ok(TaskOutput::DryRun));
        assert_eq!(walk.result, Ok(TaskOutput::Removed));
        assert_eq!(touched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_and_panics_come_back_as_errors() {
        let mut scheduler = Scheduler::new(2, None, false);
        scheduler.submit(
            Task::new(
                TaskKind::Send,
                "a",
                async { Err(SyncError::NotFound("a".into())) }.boxed(),
                0,
            )
            .with_file(FileName::new("a")),
        );
        scheduler.submit(Task::new(
            TaskKind::Send,
            "b",
            async {
                if true {
                    panic!("boom");
                }
                Ok(TaskOutput::Removed)
            }
            .boxed(),
            1,
        ));
        scheduler.finalize();

        let mut done = drain(&mut scheduler).await;
        done.sort_by_key(|f| f.then);
        assert_eq!(done[0].file, Some(FileName::new("a")));
        assert!(done[0].result.as_ref().unwrap_err().is_not_found());
        assert!(matches!(done[1].result, Err(SyncError::Transport { .. })));
    }

    #[tokio::test]
    async fn finalize_with_nothing_submitted_completes() {
        let mut scheduler: Scheduler<()> = Scheduler::new(5, None, false);
        assert!(!scheduler.is_complete());
        scheduler.finalize();
        assert!(scheduler.is_complete());
        assert!(scheduler.next_event().await.is_none());
    }
}
