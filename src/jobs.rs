use crate::plugin::TerrainSettings;
use async_channel::{bounded, Receiver, TryRecvError};
use bevy::{
    prelude::*,
    tasks::{Task, TaskPool, TaskPoolBuilder},
};
use std::{
    any::Any,
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
};

/// Cooperative cancelation flag handed to worker closures. Long-running
/// work checks it at I/O boundaries and bails out early.
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A fire-and-poll future slot. Work is dispatched, the slot is stored on
/// its tile, and each frame's update polls for the result.
#[derive(Default)]
pub enum Job<T> {
    #[default]
    Empty,
    Working {
        receiver: Receiver<T>,
        cancel: CancelToken,
    },
    Available(T),
    Canceled,
}

impl<T> Job<T> {
    pub fn empty(&self) -> bool {
        matches!(self, Job::Empty)
    }

    pub fn working(&self) -> bool {
        matches!(self, Job::Working { .. })
    }

    pub fn available(&self) -> bool {
        matches!(self, Job::Available(_))
    }

    pub fn canceled(&self) -> bool {
        matches!(self, Job::Canceled)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Job::Available(value) => Some(value),
            _ => None,
        }
    }

    /// Moves the result out, leaving the slot `Available`-shaped history
    /// behind: the caller decides what state follows.
    pub fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, Job::Empty) {
            Job::Available(value) => Some(value),
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.cancel();
        *self = Job::Empty;
    }

    /// Flags the in-flight work as canceled and forgets it.
    pub fn cancel(&mut self) {
        if let Job::Working { cancel, .. } = self {
            cancel.cancel();
            *self = Job::Canceled;
        }
    }

    /// Non-blocking readiness check; promotes `Working` to `Available`
    /// when the worker has delivered.
    pub fn poll(&mut self) {
        if let Job::Working { receiver, cancel } = self {
            if cancel.canceled() {
                *self = Job::Canceled;
                return;
            }
            match receiver.try_recv() {
                Ok(value) => *self = Job::Available(value),
                Err(TryRecvError::Empty) => {}
                // the producer vanished without delivering
                Err(TryRecvError::Closed) => *self = Job::Canceled,
            }
        }
    }

    /// Marks the slot as resolved without a payload-producing job, used by
    /// synchronous stages that still participate in the state machine.
    pub fn resolve(&mut self, value: T) {
        *self = Job::Available(value);
    }
}

type SpawnFn = Box<dyn FnOnce(&TaskPool) -> Task<()> + Send + Sync>;

struct PendingJob {
    spawn: SpawnFn,
    priority: f32,
    cancel: CancelToken,
}

/// The worker pool plus a priority queue feeding it.
///
/// Jobs are not handed to the pool immediately; they wait in the queue and
/// the highest-priority ones are released each frame as worker slots free
/// up. Canceled entries are dropped without ever running.
#[derive(Resource)]
pub struct JobSystem {
    pool: TaskPool,
    pending: Vec<PendingJob>,
    running: Vec<Task<()>>,
    in_flight: Arc<AtomicI32>,
    concurrency: usize,
}

impl FromWorld for JobSystem {
    fn from_world(world: &mut World) -> Self {
        let settings = world.resource::<TerrainSettings>();
        Self::new(settings.concurrency)
    }
}

impl JobSystem {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            pool: TaskPoolBuilder::new()
                .thread_name("globe.terrain.load".to_string())
                .num_threads(concurrency)
                .build(),
            pending: Vec::new(),
            running: Vec::new(),
            in_flight: Arc::new(AtomicI32::new(0)),
            concurrency,
        }
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed).max(0) as usize
    }

    /// Queues `work` and returns the slot that will eventually hold its
    /// result. Higher priority values run first.
    pub fn dispatch<T, F>(&mut self, priority: f32, work: F) -> Job<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + Sync + 'static,
    {
        let (sender, receiver) = bounded(1);
        let cancel = CancelToken::default();

        let worker_cancel = cancel.clone();
        let in_flight = self.in_flight.clone();

        let spawn: SpawnFn = Box::new(move |pool| {
            in_flight.fetch_add(1, Ordering::Relaxed);
            pool.spawn(async move {
                let value = work(&worker_cancel);
                let _ = sender.send(value).await;
                in_flight.fetch_sub(1, Ordering::Relaxed);
            })
        });

        self.pending.push(PendingJob {
            spawn,
            priority,
            cancel: cancel.clone(),
        });

        Job::Working { receiver, cancel }
    }

    /// Releases the highest-priority pending jobs into free worker slots
    /// and reaps finished tasks.
    pub fn pump(&mut self) {
        self.running.retain(|task| !task.is_finished());

        // sort low to high so the best candidate pops off the back
        self.pending
            .sort_by(|a, b| a.priority.total_cmp(&b.priority));

        while self.in_flight() < self.concurrency {
            let Some(job) = self.pending.pop() else {
                break;
            };
            if job.cancel.canceled() {
                continue;
            }
            let task = (job.spawn)(&self.pool);
            self.running.push(task);
        }
    }

    /// System wrapper around [`JobSystem::pump`], once per frame.
    pub fn run(mut jobs: ResMut<JobSystem>) {
        jobs.pump();
    }
}

/// A priority queue of deferred scene-graph edits. At most one operation
/// runs per frame, which bounds the update-thread cost of merging async
/// results into the live graph.
pub struct UpdateQueue<T> {
    queue: Vec<(T, f32)>,
}

impl<T> Default for UpdateQueue<T> {
    fn default() -> Self {
        Self { queue: Vec::new() }
    }
}

impl<T> UpdateQueue<T> {
    pub fn push(&mut self, op: T, priority: f32) {
        self.queue.push((op, priority));
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Pops the highest-priority operation, discarding canceled ones
    /// without running them.
    pub fn pop(&mut self, canceled: impl Fn(&T) -> bool) -> Option<T> {
        self.queue.sort_by(|a, b| a.1.total_cmp(&b.1));

        while let Some((op, _)) = self.queue.pop() {
            if !canceled(&op) {
                return Some(op);
            }
        }
        None
    }

    pub fn retain(&mut self, keep: impl Fn(&T) -> bool) {
        self.queue.retain(|(op, _)| keep(op));
    }
}

/// Deferred destruction for objects that might still be referenced by an
/// in-flight frame. Disposed objects survive a fixed number of frames
/// before their bucket comes around again and drops them.
#[derive(Resource)]
pub struct DisposalRing {
    buckets: VecDeque<Vec<Box<dyn Any + Send + Sync>>>,
}

impl Default for DisposalRing {
    fn default() -> Self {
        let mut buckets = VecDeque::with_capacity(8);
        for _ in 0..8 {
            buckets.push_back(Vec::new());
        }
        Self { buckets }
    }
}

impl DisposalRing {
    pub fn dispose<T: Any + Send + Sync>(&mut self, object: T) {
        if let Some(bucket) = self.buckets.back_mut() {
            bucket.push(Box::new(object));
        }
    }

    pub fn pending(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Drops the oldest bucket and recycles it to the back of the ring.
    pub fn rotate(mut ring: ResMut<DisposalRing>) {
        if let Some(mut oldest) = ring.buckets.pop_front() {
            oldest.clear();
            ring.buckets.push_back(oldest);
        }
    }
}

/// Render-on-demand bookkeeping: anything that changes the picture calls
/// [`RenderRequests::request_frame`], and the plugin forwards pending
/// requests as window redraws.
#[derive(Resource, Default)]
pub struct RenderRequests {
    count: AtomicI32,
}

impl RenderRequests {
    pub fn request_frame(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns and clears the pending request count.
    pub fn drain(&self) -> i32 {
        self.count.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settle<T>(job: &mut Job<T>, jobs: &mut JobSystem) {
        for _ in 0..200 {
            jobs.pump();
            job.poll();
            if !job.working() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("job did not settle");
    }

    #[test]
    fn job_resolves_through_the_pool() {
        let mut jobs = JobSystem::new(2);
        let mut job = jobs.dispatch(0.0, |_| 41 + 1);

        settle(&mut job, &mut jobs);
        assert_eq!(job.take(), Some(42));
        assert!(job.empty());
    }

    #[test]
    fn canceled_pending_job_never_runs() {
        let mut jobs = JobSystem::new(1);
        let mut job: Job<i32> = jobs.dispatch(0.0, |_| panic!("must not run"));

        job.cancel();
        assert!(job.canceled());

        // draining the queue discards the canceled entry
        jobs.pending
            .sort_by(|a, b| a.priority.total_cmp(&b.priority));
        while let Some(pending) = jobs.pending.pop() {
            assert!(pending.cancel.canceled());
        }
        assert_eq!(jobs.queued(), 0);
    }

    #[test]
    fn worker_observes_cancelation() {
        let mut jobs = JobSystem::new(1);
        let mut job = jobs.dispatch(0.0, |cancel: &CancelToken| {
            for _ in 0..1000 {
                if cancel.canceled() {
                    return -1;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            0
        });

        // release it into the pool first
        jobs.pending
            .sort_by(|a, b| a.priority.total_cmp(&b.priority));
        let pending = jobs.pending.pop().unwrap();
        let task = (pending.spawn)(&jobs.pool);
        jobs.running.push(task);

        if let Job::Working { cancel, .. } = &job {
            cancel.cancel();
        }
        job.poll();
        assert!(job.canceled());
    }

    #[test]
    fn update_queue_pops_highest_priority_first() {
        let mut queue = UpdateQueue::default();
        queue.push("low", 1.0);
        queue.push("high", 10.0);
        queue.push("mid", 5.0);

        assert_eq!(queue.pop(|_| false), Some("high"));
        assert_eq!(queue.pop(|_| false), Some("mid"));
        assert_eq!(queue.pop(|op| *op == "low"), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn disposal_ring_delays_destruction() {
        let mut ring = DisposalRing::default();
        ring.dispose(vec![1u8, 2, 3]);
        assert_eq!(ring.pending(), 1);

        // seven rotations keep it alive, the eighth reclaims its bucket
        for _ in 0..7 {
            let mut oldest = ring.buckets.pop_front().unwrap();
            oldest.clear();
            ring.buckets.push_back(oldest);
            assert_eq!(ring.pending(), 1);
        }
        let mut oldest = ring.buckets.pop_front().unwrap();
        oldest.clear();
        ring.buckets.push_back(oldest);
        assert_eq!(ring.pending(), 0);
    }
}
