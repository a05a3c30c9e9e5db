// Concurrency stress harness for record files.
//
// Purpose:
// - Drive many writer and reader threads against one record file.
// - Check that every thread sees strictly increasing sequence numbers and that
//   the union across threads is dense and duplicate-free on both sides.
// - Emit a machine-readable JSON report to stdout.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use recfile::api::{Durability, Error, ErrorKind, RecordFile, RecordFileOptions};

#[derive(Clone, Debug)]
pub struct StressArgs {
    pub path: PathBuf,
    pub record_len: u32,
    pub writers: usize,
    pub readers: usize,
    pub count: u64,
    pub durability: Durability,
    pub read_timeout: Duration,
    pub keep: bool,
}

#[derive(Debug, Serialize)]
pub struct StressReport {
    pub path: String,
    pub record_len: u32,
    pub writers: usize,
    pub readers: usize,
    pub writes: u64,
    pub reads: u64,
    pub write_seq: u64,
    pub read_seq: u64,
    pub published_seq: u64,
    pub elapsed_ms: u64,
    pub records_per_sec: f64,
}

pub fn run_stress(args: &StressArgs) -> Result<StressReport, Error> {
    if args.writers == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("--writers must be at least 1"));
    }
    if args.readers > args.writers {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("more readers than writers would wait forever")
            .with_hint("Each thread handles --count records; keep --readers <= --writers."));
    }

    let file = RecordFile::open_with(
        &args.path,
        RecordFileOptions::new(args.record_len).durability(args.durability),
    )?;
    info!(
        path = %args.path.display(),
        writers = args.writers,
        readers = args.readers,
        count = args.count,
        "stress run starting"
    );

    let outcome = drive(&file, args);
    let closed = file.close();
    if !args.keep {
        remove_scratch(&args.path);
    }
    let report = outcome?;
    closed?;
    Ok(report)
}

fn drive(file: &RecordFile, args: &StressArgs) -> Result<StressReport, Error> {
    let start = Instant::now();
    let (write_seqs, read_seqs) = thread::scope(|scope| {
        let writers: Vec<_> = (0..args.writers)
            .map(|_| scope.spawn(move || write_worker(file, args.record_len, args.count)))
            .collect();
        let readers: Vec<_> = (0..args.readers)
            .map(|_| {
                scope.spawn(move || {
                    read_worker(file, args.record_len, args.count, args.read_timeout)
                })
            })
            .collect();
        (join_all(writers), join_all(readers))
    });
    let elapsed = start.elapsed();

    check_dense("write", write_seqs?)?;
    check_dense("read", read_seqs?)?;

    let writes = args.count * args.writers as u64;
    let reads = args.count * args.readers as u64;
    Ok(StressReport {
        path: args.path.display().to_string(),
        record_len: args.record_len,
        writers: args.writers,
        readers: args.readers,
        writes,
        reads,
        write_seq: file.current_write_seq(),
        read_seq: file.current_read_seq(),
        published_seq: file.published_seq()?,
        elapsed_ms: elapsed.as_millis() as u64,
        records_per_sec: (writes + reads) as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    })
}

fn remove_scratch(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove stress file");
        }
    }
}

fn write_worker(file: &RecordFile, record_len: u32, count: u64) -> Result<Vec<u64>, Error> {
    let mut payload = vec![0u8; record_len as usize];
    let mut seqs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        getrandom::fill(&mut payload).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("random payload")
                .with_source(err)
        })?;
        let seq = file.write(&payload)?;
        ensure_increasing("write", seqs.last().copied(), seq)?;
        seqs.push(seq);
    }
    debug!(records = count, "writer finished");
    Ok(seqs)
}

fn read_worker(
    file: &RecordFile,
    record_len: u32,
    count: u64,
    timeout: Duration,
) -> Result<Vec<u64>, Error> {
    let mut seqs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let record = file.read_timeout(timeout)?;
        if record.data.len() != record_len as usize {
            return Err(Error::new(ErrorKind::Internal)
                .with_message("record has wrong length")
                .with_seq(record.seq));
        }
        ensure_increasing("read", seqs.last().copied(), record.seq)?;
        seqs.push(record.seq);
    }
    debug!(records = count, "reader finished");
    Ok(seqs)
}

fn ensure_increasing(side: &str, previous: Option<u64>, seq: u64) -> Result<(), Error> {
    match previous {
        Some(previous) if seq <= previous => Err(Error::new(ErrorKind::Internal)
            .with_message(format!("{side} seq went backwards (previous {previous})"))
            .with_seq(seq)),
        _ => Ok(()),
    }
}

fn join_all(
    handles: Vec<thread::ScopedJoinHandle<'_, Result<Vec<u64>, Error>>>,
) -> Result<Vec<u64>, Error> {
    let mut all = Vec::new();
    for handle in handles {
        let seqs = handle
            .join()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("worker thread panicked"))??;
        all.extend(seqs);
    }
    Ok(all)
}

fn check_dense(side: &str, mut seqs: Vec<u64>) -> Result<(), Error> {
    seqs.sort_unstable();
    for (expected, seq) in seqs.into_iter().enumerate() {
        if seq != expected as u64 {
            return Err(Error::new(ErrorKind::Internal)
                .with_message(format!("{side} seqs are not dense (expected {expected})"))
                .with_seq(seq));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{StressArgs, check_dense, ensure_increasing, run_stress};
    use recfile::api::{Durability, ErrorKind};
    use std::time::Duration;

    fn args(path: std::path::PathBuf, count: u64, read_timeout: Duration) -> StressArgs {
        StressArgs {
            path,
            record_len: 3,
            writers: 1,
            readers: 1,
            count,
            durability: Durability::Fast,
            read_timeout,
            keep: false,
        }
    }

    #[test]
    fn successful_run_removes_scratch_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ok.rec");
        let report = run_stress(&args(path.clone(), 50, Duration::from_secs(10))).expect("run");
        assert_eq!(report.writes, 50);
        assert_eq!(report.published_seq, 50);
        assert!(!path.exists());
    }

    #[test]
    fn scratch_file_is_removed_when_readers_time_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("racing.rec");
        // Readers that never wait usually overtake the writer and time out;
        // either way the scratch file must be gone afterwards.
        let racing = args(path.clone(), 10_000, Duration::ZERO);
        if let Err(err) = run_stress(&racing) {
            assert_eq!(err.kind(), ErrorKind::TimedOut);
        }
        assert!(!path.exists(), "scratch file left behind");
    }

    #[test]
    fn dense_sets_pass_in_any_order() {
        check_dense("write", vec![2, 0, 3, 1]).expect("dense");
        check_dense("write", Vec::new()).expect("empty");
    }

    #[test]
    fn duplicates_and_gaps_are_rejected() {
        let err = check_dense("write", vec![0, 1, 1]).expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.seq(), Some(1));

        let err = check_dense("read", vec![0, 2]).expect_err("gap");
        assert_eq!(err.seq(), Some(2));
    }

    #[test]
    fn backwards_seq_is_rejected() {
        ensure_increasing("read", None, 0).expect("first");
        ensure_increasing("read", Some(3), 4).expect("increasing");
        let err = ensure_increasing("read", Some(4), 4).expect_err("repeat");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
