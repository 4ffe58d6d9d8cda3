use threadpool::ThreadPool;

/// The pool that blocking serialization work is dispatched onto. Chunk saves
/// are I/O bound, so this is sized independently of the ingest threads.
pub struct IoPool {
    pool: ThreadPool,
}

impl IoPool {
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0);
        Self {
            pool: ThreadPool::with_name("cumulus-io".to_owned(), threads),
        }
    }

    /// Queue a job. Returns immediately.
    pub fn add<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute(job);
    }

    /// Block until every queued and running job has finished. The pool stays
    /// usable afterward.
    pub fn join(&self) {
        self.pool.join();
    }

    pub fn thread_count(&self) -> usize {
        self.pool.max_count()
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
