//! Tests for bounded buffer pools and their blocking behaviour

#[cfg(test)]
mod tests {
    use gridstitch::StitchError;
    use gridstitch::memory::pool::BufferPool;
    use gridstitch::spatial::grid::GridPosition;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn at(col: usize) -> GridPosition {
        GridPosition::new(0, col)
    }

    fn wait_for_waiters(pool: &BufferPool<Vec<u8>>, count: usize) {
        while pool.waiting() < count {
            thread::sleep(Duration::from_millis(1));
        }
    }

    // Tests a pool must own at least one buffer
    // Verified by allowing an empty pool
    #[test]
    fn test_zero_capacity_rejected() {
        let result = BufferPool::new("pixel", 0, Vec::<u8>::new);
        assert!(matches!(result, Err(StitchError::InvalidParameter { .. })));
    }

    // Tests checkouts are counted and owners tracked
    // Verified by keeping the owner after a release
    #[test]
    fn test_acquire_and_release() {
        let pool = BufferPool::new("pixel", 3, || vec![0_u8; 4]).expect("pool");

        let a = pool.acquire(at(2)).expect("first");
        let b = pool.acquire(at(0)).expect("second");
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.owners(), vec![at(0), at(2)]);
        assert_eq!(a.owner(), at(2));
        assert_ne!(a.slot(), b.slot());

        a.release();
        drop(b);
        assert_eq!(pool.available(), 3);
        assert!(pool.owners().is_empty());
        assert_eq!(pool.acquisitions(), 2);
        assert_eq!(pool.releases(), 2);
        assert_eq!(pool.peak_checked_out(), 2);
    }

    // Tests buffers keep their contents across checkouts
    // Verified by allocating a fresh buffer on every checkout
    #[test]
    fn test_buffers_are_recycled() {
        let pool = BufferPool::new("spectrum", 1, || vec![0_u8; 2]).expect("pool");
        {
            let mut buffer = pool.acquire(at(0)).expect("buffer");
            buffer[0] = 7;
        }
        let buffer = pool.acquire(at(1)).expect("buffer");
        assert_eq!(buffer.first(), Some(&7));
        assert_eq!(buffer.len(), 2);
    }

    // Tests try_acquire never blocks
    // Verified by letting try_acquire wait for a free buffer
    #[test]
    fn test_try_acquire() {
        let pool = BufferPool::new("pixel", 1, Vec::<u8>::new).expect("pool");
        let held = pool.try_acquire(at(0)).expect("open").expect("free buffer");
        assert!(pool.try_acquire(at(1)).expect("open").is_none());
        drop(held);
        assert!(pool.try_acquire(at(1)).expect("open").is_some());
    }

    // Tests a blocked acquirer is woken by a release
    // Verified by returning buffers without notifying waiters
    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = BufferPool::new("pixel", 1, Vec::<u8>::new).expect("pool");
        let held = pool.acquire(at(0)).expect("buffer");

        let waiter = pool.clone();
        let handle = thread::spawn(move || waiter.acquire(at(1)).map(|b| b.owner()));
        wait_for_waiters(&pool, 1);
        drop(held);

        assert_eq!(handle.join().expect("joined").expect("acquired"), at(1));
    }

    // Tests waiters are served in arrival order
    // Verified by serving the most recent waiter first
    #[test]
    fn test_waiters_are_fifo() {
        let pool = BufferPool::new("pixel", 1, Vec::<u8>::new).expect("pool");
        let held = pool.acquire(at(0)).expect("buffer");
        let (sender, order) = mpsc::channel();

        let mut handles = Vec::new();
        for col in 1..=3 {
            let waiter = pool.clone();
            let sender = sender.clone();
            handles.push(thread::spawn(move || {
                let buffer = waiter.acquire(at(col)).expect("acquired");
                sender.send(col).expect("send");
                thread::sleep(Duration::from_millis(5));
                drop(buffer);
            }));
            wait_for_waiters(&pool, col);
        }
        drop(held);
        for handle in handles {
            handle.join().expect("joined");
        }

        let served: Vec<usize> = order.try_iter().collect();
        assert_eq!(served, vec![1, 2, 3]);
    }

    // Tests closing wakes waiters with PoolClosed and still accepts returns
    // Verified by closing the pool without notifying waiters
    #[test]
    fn test_close_wakes_waiters() {
        let pool = BufferPool::new("pixel", 1, Vec::<u8>::new).expect("pool");
        let held = pool.acquire(at(0)).expect("buffer");

        let waiter = pool.clone();
        let handle = thread::spawn(move || waiter.acquire(at(1)).map(|b| b.owner()));
        wait_for_waiters(&pool, 1);
        pool.close();

        let result = handle.join().expect("joined");
        assert!(matches!(result, Err(StitchError::PoolClosed { pool: "pixel" })));
        assert!(pool.is_closed());
        assert!(pool.try_acquire(at(2)).is_err());

        drop(held);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.waiting(), 0);
    }
}
