#![allow(dead_code)]
use log::{Level, LevelFilter, Log, Metadata, Record};
use mesh_m2n::{
    algs::communicator::ThreadComm,
    algs::marshal::CellBlock,
    config::{M2nConfig, ServerMode},
};
use std::sync::{Mutex, Once};
use std::thread::{self, ThreadId};

/// Run `f` once per rank of a fresh `ThreadComm` world, one thread each,
/// and collect the results in rank order.
pub fn run_world<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ThreadComm) -> T + Sync,
{
    let world = ThreadComm::world(size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = world.iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// `n` cells tagged with their origin rank: cell `i` is `[rank, i]`.
pub fn cells(rank: usize, n: usize) -> CellBlock {
    (0..n).map(|i| vec![rank as u8, i as u8]).collect()
}

/// Origin rank of every cell in a block, in order.
pub fn origins(block: &CellBlock) -> Vec<u8> {
    block.cells().iter().map(|c| c[0]).collect()
}

pub fn config(mode: ServerMode, connections: usize) -> M2nConfig {
    M2nConfig {
        mode,
        number_of_connections: connections,
        wait_timeout_ms: Some(10_000),
        ..Default::default()
    }
}

/// Global logger that keeps every record with the thread that emitted it.
struct CaptureLog {
    records: Mutex<Vec<(ThreadId, Level, String)>>,
}

impl Log for CaptureLog {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push((thread::current().id(), record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static CAPTURE: CaptureLog = CaptureLog {
    records: Mutex::new(Vec::new()),
};
static INSTALL: Once = Once::new();

/// Run `f` and return the log records it emitted on this thread.
///
/// Records from other test threads are left alone, so tests using this
/// may run in parallel.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<(Level, String)>) {
    INSTALL.call_once(|| {
        log::set_logger(&CAPTURE).expect("another logger is installed");
        log::set_max_level(LevelFilter::Trace);
    });
    let me = thread::current().id();
    CAPTURE.records.lock().unwrap().retain(|(id, _, _)| *id != me);
    let out = f();
    let mut records = CAPTURE.records.lock().unwrap();
    let (mine, rest): (Vec<_>, Vec<_>) = records.drain(..).partition(|(id, _, _)| *id == me);
    *records = rest;
    (out, mine.into_iter().map(|(_, level, msg)| (level, msg)).collect())
}

/// Messages logged at `error` level.
pub fn errors(records: &[(Level, String)]) -> Vec<&str> {
    records
        .iter()
        .filter(|(level, _)| *level == Level::Error)
        .map(|(_, msg)| msg.as_str())
        .collect()
}
