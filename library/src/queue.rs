use core::cell::UnsafeCell;

use array_init::array_init;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{Block, Fault, QueueFull};

/// Fixed ring of planned blocks shared between the planner (main context) and the
/// step generator (timer interrupt). One slot stays empty so full and empty differ.
///
/// Ownership of a slot moves with the indices: `tail` belongs to the producer, `head`
/// to the consumer, and a set busy flag hands the head block to the consumer for good.
pub struct MoveQueue<const N: usize> {
    slots: [UnsafeCell<Block>; N],
    busy: [AtomicBool; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    planning: AtomicBool,
    split: AtomicBool,
}

// Slots are only read or written by the side the index protocol hands them to.
unsafe impl<const N: usize> Sync for MoveQueue<N> {}

impl<const N: usize> Default for MoveQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MoveQueue<N> {
    const VALID_SIZE: () = assert!(N >= 2 && N.is_power_of_two(), "queue size must be a power of two");

    pub fn new() -> Self {
        let () = Self::VALID_SIZE;
        Self {
            slots: array_init(|_| UnsafeCell::new(Block::default())),
            busy: array_init(|_| AtomicBool::new(false)),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            planning: AtomicBool::new(false),
            split: AtomicBool::new(false),
        }
    }

    fn wrap_index(i: usize) -> usize {
        i & (N - 1)
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        Self::wrap_index(tail.wrapping_sub(head))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands out the only producer and consumer. Returns `None` after the first call.
    pub fn split(&self) -> Option<(Producer<'_, N>, Consumer<'_, N>)> {
        if self.split.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some((Producer { queue: self, sequence: 0 }, Consumer { queue: self }))
    }

    /// Drops every block, including the one being executed. Only safe to race with
    /// the consumer once it has been told to stop.
    pub fn flush(&self) {
        let tail = self.tail.load(Ordering::Acquire);
        for busy in self.busy.iter() {
            busy.store(false, Ordering::Release);
        }
        self.head.store(tail, Ordering::Release);
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockHandle {
    pub slot: usize,
    pub sequence: u32,
}

pub struct Producer<'q, const N: usize> {
    queue: &'q MoveQueue<N>,
    sequence: u32,
}

impl<'q, const N: usize> Producer<'q, N> {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= N - 1
    }

    pub fn try_push(&mut self, block: Block) -> Result<BlockHandle, QueueFull> {
        self.lock().try_push(block)
    }

    /// Takes the planning lock. The step generator will not start a new block until the
    /// window is dropped, and a block it already started is left out of the window.
    pub fn lock(&mut self) -> PlanWindow<'_, N> {
        let queue = self.queue;
        queue.planning.store(true, Ordering::SeqCst);
        let head = queue.head.load(Ordering::SeqCst);
        let tail = queue.tail.load(Ordering::Relaxed);
        let started = (head != tail && queue.busy[head].load(Ordering::SeqCst)).then_some(head);
        let first = match started {
            Some(head) => MoveQueue::<N>::wrap_index(head + 1),
            None => head,
        };
        PlanWindow { queue, first, started, sequence: &mut self.sequence }
    }

    /// Up to `window` of the most recently pushed blocks, newest first, never including
    /// a block the step generator has started.
    pub fn peek_recent(&self, window: usize) -> impl Iterator<Item = &Block> + '_ {
        let queue = self.queue;
        let tail = queue.tail.load(Ordering::Relaxed);
        let len = queue.len();
        (1..=len.min(window))
            .map(move |back| MoveQueue::<N>::wrap_index(tail.wrapping_sub(back)))
            .take_while(move |i| !queue.busy[*i].load(Ordering::Acquire))
            .map(move |i| unsafe { &*queue.slots[i].get() })
    }
}

/// The mutable part of the queue while the planning lock is held. Index 0 is the oldest
/// block the planner may still touch; its entry speed is fixed by whatever came before it.
pub struct PlanWindow<'w, const N: usize> {
    queue: &'w MoveQueue<N>,
    first: usize,
    started: Option<usize>,
    sequence: &'w mut u32,
}

impl<'w, const N: usize> PlanWindow<'w, N> {
    fn slot_index(&self, k: usize) -> usize {
        MoveQueue::<N>::wrap_index(self.first + k)
    }

    pub fn len(&self) -> usize {
        let tail = self.queue.tail.load(Ordering::Relaxed);
        MoveQueue::<N>::wrap_index(tail.wrapping_sub(self.first))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The block the step generator is running, if it was running when the lock was taken.
    /// Read only; its speeds are final.
    pub fn started(&self) -> Option<&Block> {
        self.started.map(|slot| unsafe { &*self.queue.slots[slot].get() })
    }

    pub fn get(&self, k: usize) -> Option<&Block> {
        (k < self.len()).then(|| unsafe { &*self.queue.slots[self.slot_index(k)].get() })
    }

    pub fn get_mut(&mut self, k: usize) -> Option<&mut Block> {
        (k < self.len()).then(|| unsafe { &mut *self.queue.slots[self.slot_index(k)].get() })
    }

    /// Blocks `k` and `k + 1` together.
    pub fn pair_mut(&mut self, k: usize) -> Option<(&mut Block, &mut Block)> {
        if k + 1 >= self.len() {
            return None;
        }
        let (a, b) = (self.slot_index(k), self.slot_index(k + 1));
        // distinct slots since k + 1 < len < N
        Some(unsafe { (&mut *self.queue.slots[a].get(), &mut *self.queue.slots[b].get()) })
    }

    pub fn try_push(&mut self, mut block: Block) -> Result<BlockHandle, QueueFull> {
        let tail = self.queue.tail.load(Ordering::Relaxed);
        let next = MoveQueue::<N>::wrap_index(tail + 1);
        if next == self.queue.head.load(Ordering::Acquire) {
            return Err(QueueFull);
        }
        let sequence = *self.sequence;
        *self.sequence = sequence.wrapping_add(1);
        block.sequence = sequence;
        unsafe { *self.queue.slots[tail].get() = block };
        self.queue.tail.store(next, Ordering::Release);
        Ok(BlockHandle { slot: tail, sequence })
    }
}

impl<'w, const N: usize> Drop for PlanWindow<'w, N> {
    fn drop(&mut self) {
        self.queue.planning.store(false, Ordering::SeqCst);
    }
}

pub struct Consumer<'q, const N: usize> {
    queue: &'q MoveQueue<N>,
}

impl<'q, const N: usize> Consumer<'q, N> {
    /// Claims the oldest block. `Ok(None)` when the queue is empty or the planner holds
    /// the lock; calling again for a block already claimed returns it again.
    pub fn start_next(&mut self) -> Result<Option<Block>, Fault> {
        let head = self.queue.head.load(Ordering::Acquire);
        let tail = self.queue.tail.load(Ordering::Acquire);
        if head >= N || tail >= N {
            return Err(Fault::QueueCorrupted);
        }
        if head == tail {
            return Ok(None);
        }
        let busy = &self.queue.busy[head];
        if !busy.load(Ordering::Acquire) {
            busy.store(true, Ordering::SeqCst);
            if self.queue.planning.load(Ordering::SeqCst) {
                busy.store(false, Ordering::SeqCst);
                return Ok(None);
            }
        }
        Ok(Some(unsafe { *self.queue.slots[head].get() }))
    }

    /// Retires the executing block once all of its step events are done.
    pub fn pop_if_complete(&mut self, steps_completed: u32) -> Option<Block> {
        let head = self.queue.head.load(Ordering::Acquire);
        let tail = self.queue.tail.load(Ordering::Acquire);
        if head == tail || head >= N || !self.queue.busy[head].load(Ordering::Acquire) {
            return None;
        }
        let block = unsafe { *self.queue.slots[head].get() };
        if steps_completed < block.step_event_count {
            return None;
        }
        self.queue.busy[head].store(false, Ordering::Release);
        self.queue.head.store(MoveQueue::<N>::wrap_index(head + 1), Ordering::Release);
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DirectionBits, XYZData};

    fn block(steps: u32) -> Block {
        Block::new(XYZData::new(steps, 0, 0), DirectionBits::empty(), steps as f32, XYZData::new(1.0, 0.0, 0.0), 10.0, 100.0)
    }

    #[test]
    fn holds_one_less_than_size() {
        let q = MoveQueue::<4>::new();
        let (mut producer, _consumer) = q.split().unwrap();
        assert_eq!(q.capacity(), 3);
        for i in 1..=3 {
            assert!(producer.try_push(block(i)).is_ok());
        }
        assert!(producer.is_full());
        assert_eq!(producer.try_push(block(9)), Err(QueueFull));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn split_only_once() {
        let q = MoveQueue::<4>::new();
        assert!(q.split().is_some());
        assert!(q.split().is_none());
    }

    #[test]
    fn fifo_with_wrap_around() {
        let q = MoveQueue::<4>::new();
        let (mut producer, mut consumer) = q.split().unwrap();
        for round in 0..5u32 {
            producer.try_push(block(round + 1)).unwrap();
            producer.try_push(block(round + 10)).unwrap();
            let first = consumer.start_next().unwrap().unwrap();
            assert_eq!(first.step_event_count, round + 1);
            assert_eq!(consumer.pop_if_complete(first.step_event_count).map(|b| b.sequence), Some(round * 2));
            let second = consumer.start_next().unwrap().unwrap();
            assert_eq!(second.step_event_count, round + 10);
            assert!(consumer.pop_if_complete(second.step_event_count).is_some());
        }
        assert!(q.is_empty());
    }

    #[test]
    fn pop_waits_for_all_steps() {
        let q = MoveQueue::<4>::new();
        let (mut producer, mut consumer) = q.split().unwrap();
        producer.try_push(block(5)).unwrap();
        assert!(consumer.pop_if_complete(5).is_none(), "not started yet");
        consumer.start_next().unwrap();
        assert!(consumer.pop_if_complete(4).is_none());
        assert!(consumer.pop_if_complete(5).is_some());
    }

    #[test]
    fn planning_lock_holds_back_the_consumer() {
        let q = MoveQueue::<4>::new();
        let (mut producer, mut consumer) = q.split().unwrap();
        producer.try_push(block(3)).unwrap();
        {
            let window = producer.lock();
            assert_eq!(window.len(), 1);
            assert_eq!(consumer.start_next(), Ok(None));
        }
        assert!(consumer.start_next().unwrap().is_some());
    }

    #[test]
    fn busy_block_leaves_the_window() {
        let q = MoveQueue::<8>::new();
        let (mut producer, mut consumer) = q.split().unwrap();
        producer.try_push(block(1)).unwrap();
        producer.try_push(block(2)).unwrap();
        producer.try_push(block(3)).unwrap();
        consumer.start_next().unwrap();

        let mut window = producer.lock();
        assert_eq!(window.len(), 2);
        assert_eq!(window.get(0).map(|b| b.step_event_count), Some(2));
        let (a, b) = window.pair_mut(0).unwrap();
        assert_eq!((a.step_event_count, b.step_event_count), (2, 3));
        assert!(window.pair_mut(1).is_none());
        drop(window);

        let recent: arrayvec::ArrayVec<u32, 8> = producer.peek_recent(8).map(|b| b.step_event_count).collect();
        assert_eq!(recent.as_slice(), &[3, 2]);
        let recent: arrayvec::ArrayVec<u32, 8> = producer.peek_recent(1).map(|b| b.step_event_count).collect();
        assert_eq!(recent.as_slice(), &[3]);
    }

    #[test]
    fn started_block_is_busy_in_its_slot_not_its_flags() {
        let q = MoveQueue::<4>::new();
        let (mut producer, mut consumer) = q.split().unwrap();
        producer.try_push(block(4)).unwrap();
        let flags = producer.lock().get(0).map(|b| b.flags);
        let started = consumer.start_next().unwrap().unwrap();
        assert_eq!(Some(started.flags), flags);
        assert!(q.busy[0].load(Ordering::Acquire));

        let window = producer.lock();
        assert!(window.is_empty());
        assert_eq!(window.started().map(|b| (b.sequence, b.flags)), Some((started.sequence, started.flags)));
        drop(window);

        assert!(consumer.pop_if_complete(4).is_some());
        assert!(!q.busy[0].load(Ordering::Acquire));
    }

    #[test]
    fn flush_drops_everything() {
        let q = MoveQueue::<8>::new();
        let (mut producer, mut consumer) = q.split().unwrap();
        producer.try_push(block(1)).unwrap();
        producer.try_push(block(2)).unwrap();
        consumer.start_next().unwrap();
        q.flush();
        assert!(q.is_empty());
        assert_eq!(consumer.start_next(), Ok(None));
        assert!(consumer.pop_if_complete(100).is_none());
        producer.try_push(block(7)).unwrap();
        assert_eq!(consumer.start_next().unwrap().map(|b| b.step_event_count), Some(7));
    }
}
