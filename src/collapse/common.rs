use std::io;
use std::mem;

use ahash::AHashMap;
use once_cell::sync::Lazy;

#[cfg(feature = "multithreaded")]
use std::sync::Arc;

#[cfg(feature = "multithreaded")]
use crossbeam_channel::{bounded, select};
#[cfg(feature = "multithreaded")]
use dashmap::DashMap;

const CAPACITY_HASHMAP: usize = 512;
pub(crate) const CAPACITY_READER: usize = 128 * 1024;
pub(crate) const DEFAULT_NSTACKS_PER_JOB: usize = 100;
#[cfg(feature = "multithreaded")]
const NBYTES_PER_STACK_GUESS: usize = 1024;

/// The default number of threads used for collapsing.
#[cfg(feature = "multithreaded")]
pub static DEFAULT_NTHREADS: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
});

/// The default number of threads used for collapsing.
#[cfg(not(feature = "multithreaded"))]
pub static DEFAULT_NTHREADS: Lazy<usize> = Lazy::new(|| 1);

/// Private trait for internal library authors.
///
/// Implementing this trait provides the public-facing `Collapse` trait for
/// free, including parallel collapsing, as long as the requirements described
/// below are adhered to.
pub trait CollapsePrivate: Send + Sized {
    // *********************************************************** //
    // ********************* REQUIRED METHODS ******************** //
    // *********************************************************** //

    /// Consume any header information at the start of the input (i.e. advance
    /// the provided reader past it) and do whatever up-front processing needs
    /// to happen on the main thread before worker threads are spun up.
    ///
    /// For `perf` this is where the implicit event filter is captured: the
    /// worker threads need to know the filter before any chunk of input can
    /// be handed to them, otherwise which event "wins" would depend on thread
    /// scheduling.
    fn pre_process<R>(&mut self, reader: &mut R, occurrences: &mut Occurrences) -> io::Result<()>
    where
        R: io::BufRead;

    /// The primary method: parse the stack data in the reader and fold it
    /// into the provided `Occurrences` map.
    ///
    /// This method may be called multiple times (once per input chunk when
    /// collapsing in parallel), so any per-stack state in `self` **must** be
    /// reset before it returns. It may **not** use threads itself.
    fn collapse_single_threaded<R>(
        &mut self,
        reader: R,
        occurrences: &mut Occurrences,
    ) -> io::Result<()>
    where
        R: io::BufRead;

    /// Returns whether the provided line represents the end of a stack.
    ///
    /// Used to chunk the input on complete-stack boundaries before sending it
    /// to worker threads, which must receive whole stacks.
    fn would_end_stack(&self, line: &[u8]) -> bool;

    /// Returns a clone of `self` with any per-stack parsing state cleared,
    /// suitable for handing to a worker thread. Shared configuration (and
    /// anything captured by `pre_process`, like the event filter) must be
    /// preserved.
    fn clone_and_reset_stack_context(&self) -> Self;

    /// Whether this implementation corresponds with the given input string.
    ///
    /// - `None` means "not sure -- need more input"
    /// - `Some(true)` means "yes, this implementation should work with this string"
    /// - `Some(false)` means "no, this implementation definitely won't work"
    fn is_applicable_(&mut self, input: &str) -> Option<bool>;

    /// The number of stacks per job to send to the threadpool.
    fn nstacks_per_job(&self) -> usize;

    /// Sets the number of stacks per job to send to the threadpool.
    fn set_nstacks_per_job(&mut self, n: usize);

    /// The number of threads to use.
    fn nthreads(&self) -> usize;

    /// Sets the number of threads to use.
    fn set_nthreads(&mut self, n: usize);

    // *********************************************************** //
    // ******************** PROVIDED METHODS ********************* //
    // *********************************************************** //

    /// Collapses the input into an occurrence map, dispatching to the
    /// single- or multi-threaded implementation depending on `nthreads`.
    fn collapse_occurrences<R>(&mut self, mut reader: R) -> io::Result<Occurrences>
    where
        R: io::BufRead,
    {
        let mut occurrences = Occurrences::new(self.nthreads());

        self.pre_process(&mut reader, &mut occurrences)?;

        if occurrences.is_concurrent() {
            #[cfg(feature = "multithreaded")]
            self.collapse_multi_threaded(reader, &mut occurrences)?;
            #[cfg(not(feature = "multithreaded"))]
            unreachable!("occurrences cannot be concurrent without the multithreaded feature");
        } else {
            self.collapse_single_threaded(reader, &mut occurrences)?;
        }

        Ok(occurrences)
    }

    /// Collapses the input and writes sorted folded lines to `writer`.
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> io::Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut occurrences = self.collapse_occurrences(reader)?;
        occurrences.write_and_clear(writer)
    }

    #[cfg(feature = "multithreaded")]
    fn collapse_multi_threaded<R>(
        &mut self,
        mut reader: R,
        occurrences: &mut Occurrences,
    ) -> io::Result<()>
    where
        R: io::BufRead,
    {
        let nstacks_per_job = self.nstacks_per_job();
        let nthreads = self.nthreads();

        assert_ne!(nstacks_per_job, 0);
        assert!(nthreads > 1);
        assert!(occurrences.is_concurrent());

        crossbeam_utils::thread::scope(|scope| {
            // Channel for sending an error from the worker threads to the main
            // thread in the event a worker has failed.
            let (tx_error, rx_error) = bounded::<io::Error>(1);

            // Channel for sending input data from the main thread to the
            // worker threads. `2 * nthreads` bounds memory usage on very
            // large input files.
            let (tx_input, rx_input) = bounded::<Option<Vec<u8>>>(2 * nthreads);

            // Channel for worker threads that have errored to signal to all
            // the other worker threads that they should stop work immediately
            // and return.
            let (tx_stop, rx_stop) = bounded::<()>(nthreads - 1);

            let mut handles = Vec::with_capacity(nthreads);
            for _ in 0..nthreads {
                let tx_error = tx_error.clone();
                let rx_input = rx_input.clone();
                let (tx_stop, rx_stop) = (tx_stop.clone(), rx_stop.clone());

                let mut folder = self.clone_and_reset_stack_context();
                let mut occurrences = occurrences.clone();

                let handle = scope.spawn(move |_| loop {
                    select! {
                        recv(rx_input) -> input => {
                            // Either `Some(<input data>)`, or `None` to signal
                            // that no more input data will be sent.
                            let data = match input.unwrap() {
                                Some(data) => data,
                                None => return,
                            };
                            if let Err(e) = folder.collapse_single_threaded(&data[..], &mut occurrences) {
                                // Notify all other threads to stop work, then
                                // hand the error to the main thread. Both
                                // channels may be full if another thread beat
                                // us to it, in which case there is nothing
                                // left to do.
                                for _ in 0..(nthreads - 1) {
                                    let _ = tx_stop.try_send(());
                                }
                                let _ = tx_error.try_send(e);
                                return;
                            }
                        },
                        recv(rx_stop) -> _ => {
                            // Another worker errored; cease work immediately.
                            return;
                        },
                    }
                });
                handles.push(handle);
            }

            // Drop the main thread's handle to the input receiver so that a
            // `SendError` below reliably means all the workers have shut down.
            drop(rx_input);

            let buf_capacity = usize::next_power_of_two(NBYTES_PER_STACK_GUESS * nstacks_per_job);
            let mut buf = Vec::with_capacity(buf_capacity);
            let (mut index, mut nstacks) = (0, 0);

            loop {
                let n = reader.read_until(b'\n', &mut buf)?;
                if n == 0 {
                    // End of the data; ship the final chunk. The workers may
                    // or may not still be alive, but either way we're done
                    // reading, so a send failure doesn't matter here.
                    let _ = tx_input.send(Some(buf));
                    break;
                }
                let line = &buf[index..index + n];
                index += n;
                if self.would_end_stack(line) {
                    nstacks += 1;
                    if nstacks == nstacks_per_job {
                        let buf_capacity = usize::next_power_of_two(buf.capacity());
                        let chunk = mem::replace(&mut buf, Vec::with_capacity(buf_capacity));
                        if tx_input.send(Some(chunk)).is_err() {
                            // A worker errored and they have all shut down;
                            // the error is waiting on the error channel.
                            break;
                        }
                        index = 0;
                        nstacks = 0;
                    }
                }
            }

            // Out of input data; tell the workers.
            for _ in &handles {
                if tx_input.send(None).is_err() {
                    break;
                }
            }

            // Drop our error sender so polling the receiver below terminates
            // once every worker has finished.
            drop(tx_error);

            let maybe_error = rx_error.iter().next();

            for handle in handles {
                handle.join().unwrap();
            }

            if let Some(e) = maybe_error {
                return Err(e);
            }

            Ok(())
        })
        .unwrap()
    }
}

/// The occurrence map: how many times (weighted) each folded stack key has
/// been seen. Backed by an `AHashMap` when single-threaded and a shared
/// `DashMap` when collapsing in parallel.
#[derive(Clone, Debug)]
pub enum Occurrences {
    /// Map used when collapsing on a single thread.
    SingleThreaded(AHashMap<String, u64>),
    /// Shared map used by the worker threads.
    #[cfg(feature = "multithreaded")]
    MultiThreaded(Arc<DashMap<String, u64, ahash::RandomState>>),
}

impl Occurrences {
    pub(crate) fn new(nthreads: usize) -> Self {
        assert_ne!(nthreads, 0);
        #[cfg(feature = "multithreaded")]
        {
            if nthreads == 1 {
                Occurrences::SingleThreaded(AHashMap::with_capacity(CAPACITY_HASHMAP))
            } else {
                let map = DashMap::with_capacity_and_hasher(
                    CAPACITY_HASHMAP,
                    ahash::RandomState::default(),
                );
                Occurrences::MultiThreaded(Arc::new(map))
            }
        }
        #[cfg(not(feature = "multithreaded"))]
        {
            let _ = nthreads;
            Occurrences::SingleThreaded(AHashMap::with_capacity(CAPACITY_HASHMAP))
        }
    }

    /// Adds `weight` to the count for `key`, inserting it if absent.
    pub(crate) fn insert_or_add(&mut self, key: String, weight: u64) {
        use self::Occurrences::*;
        match self {
            SingleThreaded(map) => *map.entry(key).or_insert(0) += weight,
            #[cfg(feature = "multithreaded")]
            MultiThreaded(arc) => {
                *arc.entry(key).or_insert(0) += weight;
            }
        }
    }

    pub(crate) fn is_concurrent(&self) -> bool {
        use self::Occurrences::*;
        match self {
            SingleThreaded(_) => false,
            #[cfg(feature = "multithreaded")]
            MultiThreaded(_) => true,
        }
    }

    /// Drains the map into `writer` as folded lines sorted by stack key.
    pub(crate) fn write_and_clear<W>(&mut self, mut writer: W) -> io::Result<()>
    where
        W: io::Write,
    {
        use self::Occurrences::*;
        match self {
            SingleThreaded(ref mut map) => {
                let mut contents: Vec<_> = map.drain().collect();
                contents.sort();
                for (key, value) in contents {
                    crate::folded::write_line(&mut writer, &key, value)?;
                }
            }
            #[cfg(feature = "multithreaded")]
            MultiThreaded(ref mut arc) => {
                let map = match Arc::get_mut(arc) {
                    Some(map) => map,
                    None => panic!(
                        "attempted to drain a concurrent occurrence map while \
                         more than one thread still has access to it"
                    ),
                };
                let map = mem::replace(
                    map,
                    DashMap::with_capacity_and_hasher(
                        CAPACITY_HASHMAP,
                        ahash::RandomState::default(),
                    ),
                );
                let mut contents: Vec<_> = map.into_iter().collect();
                contents.sort();
                for (key, value) in contents {
                    crate::folded::write_line(&mut writer, &key, value)?;
                }
            }
        }
        Ok(())
    }

    /// Consumes the map, returning the folded mapping.
    pub(crate) fn into_map(self) -> AHashMap<String, u64> {
        use self::Occurrences::*;
        match self {
            SingleThreaded(map) => map,
            #[cfg(feature = "multithreaded")]
            MultiThreaded(arc) => match Arc::try_unwrap(arc) {
                Ok(map) => map.into_iter().collect(),
                Err(_) => panic!(
                    "attempted to consume a concurrent occurrence map while \
                     more than one thread still has access to it"
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurrences_accumulate() {
        let mut occ = Occurrences::new(1);
        occ.insert_or_add("app;main".to_string(), 2);
        occ.insert_or_add("app;main".to_string(), 3);
        occ.insert_or_add("app;idle".to_string(), 1);
        let map = occ.into_map();
        assert_eq!(map.get("app;main"), Some(&5));
        assert_eq!(map.get("app;idle"), Some(&1));
    }

    #[test]
    fn write_is_sorted() {
        let mut occ = Occurrences::new(1);
        occ.insert_or_add("b;y".to_string(), 2);
        occ.insert_or_add("a;z".to_string(), 1);
        occ.insert_or_add("a;x".to_string(), 7);
        let mut out = Vec::new();
        occ.write_and_clear(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a;x 7\na;z 1\nb;y 2\n");
    }

    #[cfg(feature = "multithreaded")]
    #[test]
    fn concurrent_occurrences_accumulate() {
        let mut occ = Occurrences::new(4);
        assert!(occ.is_concurrent());
        occ.insert_or_add("app;main".to_string(), 2);
        occ.insert_or_add("app;main".to_string(), 3);
        let map = occ.into_map();
        assert_eq!(map.get("app;main"), Some(&5));
    }
}
