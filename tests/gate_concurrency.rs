use chartshot::gate::{EngineFactory, EngineState, RenderGate};
use chartshot::{AbortHandle, EngineConfig, Error, RawFrame, RenderEngine};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counts how many renders are inside the engine at once
#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
    interrupted: AtomicUsize,
    engines: AtomicUsize,
}

struct CountingEngine {
    counters: Arc<Counters>,
    delay: Duration,
    /// Set through the abort handle, when the engine hands one out
    abort: Option<Arc<AtomicBool>>,
}

/// `file:///x.html?ms=400` loads for 400 ms instead of the engine default
fn load_time(address: &str, default: Duration) -> Duration {
    address
        .split_once("ms=")
        .and_then(|(_, ms)| ms.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl RenderEngine for CountingEngine {
    fn new(_config: EngineConfig) -> chartshot::Result<Self> {
        Ok(Self {
            counters: Arc::new(Counters::default()),
            delay: Duration::ZERO,
            abort: None,
        })
    }

    fn navigate(&mut self, address: &str) -> chartshot::Result<()> {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let until = Instant::now() + load_time(address, self.delay);
        while Instant::now() < until {
            if self.abort.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.counters.interrupted.fetch_add(1, Ordering::SeqCst);
                return Err(Error::LoadError(format!("{} interrupted", address)));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn capture(&mut self) -> chartshot::Result<RawFrame> {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        Ok(chartshot::raster::rasterize_with_seed(2, 2, b"counted"))
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        let flag = self.abort.clone()?;
        Some(AbortHandle::new(move || flag.store(true, Ordering::SeqCst)))
    }
}

fn counting_factory(counters: Arc<Counters>, delay: Duration, abortable: bool) -> EngineFactory {
    Arc::new(move || -> chartshot::Result<Box<dyn RenderEngine>> {
        counters.engines.fetch_add(1, Ordering::SeqCst);
        let engine = CountingEngine {
            counters: counters.clone(),
            delay,
            abort: abortable.then(|| Arc::new(AtomicBool::new(false))),
        };
        Ok(Box::new(engine) as Box<dyn RenderEngine>)
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn never_more_than_one_render_in_flight() {
    let counters = Arc::new(Counters::default());
    let factory = counting_factory(counters.clone(), Duration::from_millis(2), false);
    let gate = Arc::new(RenderGate::start(factory, Duration::from_secs(10)).await.unwrap());

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.render(&format!("file:///widget-{}.html", i)).await })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(counters.completed.load(Ordering::SeqCst), 64);
    assert_eq!(counters.engines.load(Ordering::SeqCst), 1);
    assert_eq!(gate.state(), EngineState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_render_is_over_before_the_next_one_starts() {
    let counters = Arc::new(Counters::default());
    let factory = counting_factory(counters.clone(), Duration::ZERO, false);
    let gate = RenderGate::start(factory, Duration::from_millis(300)).await.unwrap();

    let started = Instant::now();
    let err = gate.render("file:///hang.html?ms=1500").await.unwrap_err();
    assert!(matches!(err, Error::Timeout(300)));
    assert_eq!(err.kind(), chartshot::ErrorKind::Render);
    // The caller is released at the timeout, not when the engine gives up.
    assert!(started.elapsed() < Duration::from_millis(1200));

    // The next caller gets a fresh engine, and only once the stuck one is done.
    let frame = gate.render("file:///next.html").await.unwrap();
    assert_eq!((frame.width, frame.height), (2, 2));
    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(counters.completed.load(Ordering::SeqCst), 2);
    assert_eq!(counters.engines.load(Ordering::SeqCst), 2);
    assert_eq!(gate.engines_started(), 2);
    assert_eq!(gate.state(), EngineState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_render_is_interrupted_through_the_abort_handle() {
    let counters = Arc::new(Counters::default());
    let factory = counting_factory(counters.clone(), Duration::ZERO, true);
    let gate = RenderGate::start(factory, Duration::from_millis(200)).await.unwrap();

    let started = Instant::now();
    assert!(gate.render("file:///hang.html?ms=10000").await.unwrap_err().is_timeout());
    gate.render("file:///next.html").await.unwrap();

    // The stuck load was cut short instead of being sat out.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(counters.interrupted.load(Ordering::SeqCst), 1);
    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(gate.engines_started(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_caller_does_not_spend_the_next_callers_budget() {
    let counters = Arc::new(Counters::default());
    let factory = counting_factory(counters.clone(), Duration::ZERO, false);
    let gate = Arc::new(RenderGate::start(factory, Duration::from_millis(300)).await.unwrap());

    let abandoned = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.render("file:///abandoned.html?ms=400").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    abandoned.abort();

    // Fits its own 300 ms budget once the abandoned job is out of the way.
    gate.render("file:///after.html?ms=200").await.unwrap();
    assert_eq!(counters.completed.load(Ordering::SeqCst), 2);
    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(gate.engines_started(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_dropped_while_waiting_keeps_the_job_parked() {
    let counters = Arc::new(Counters::default());
    let factory = counting_factory(counters.clone(), Duration::ZERO, false);
    let gate = Arc::new(RenderGate::start(factory, Duration::from_secs(5)).await.unwrap());

    let spawn_render = |address: &'static str| {
        let gate = gate.clone();
        tokio::spawn(async move { gate.render(address).await })
    };
    let first = spawn_render("file:///first.html?ms=300");
    tokio::time::sleep(Duration::from_millis(30)).await;
    first.abort();
    // Admitted behind the abandoned job, then dropped while waiting for it.
    let second = spawn_render("file:///second.html?ms=10");
    tokio::time::sleep(Duration::from_millis(30)).await;
    second.abort();

    gate.render("file:///third.html?ms=10").await.unwrap();
    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(gate.engines_started(), 1);
}
