use fenris_hetero::dispatch::{
    DispatchConfig, Dispatcher, ElementLoop, Functor, JacobianLoop, LaunchStats, LoopTag, ResidualLoop,
};
use fenris_hetero::space::{current_space, MemorySpace};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts invocations per loop and records the space of every work-item.
#[derive(Default)]
struct Recorder {
    residual: AtomicUsize,
    jacobian: AtomicUsize,
    device: AtomicUsize,
}

impl Recorder {
    fn record_space(&self) {
        if current_space() == MemorySpace::Device {
            self.device.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Functor<ResidualLoop> for Recorder {
    fn call(&self, _: ResidualLoop, _index: usize) {
        self.residual.fetch_add(1, Ordering::Relaxed);
        self.record_space();
    }
}

impl Functor<JacobianLoop> for Recorder {
    fn call(&self, _: JacobianLoop, index: usize) {
        self.jacobian.fetch_add(index, Ordering::Relaxed);
        self.record_space();
    }
}

#[test]
fn loop_tags_select_the_work_item_body() {
    let recorder = Recorder::default();
    let dispatcher = Dispatcher::host();
    dispatcher.parallel_for::<ResidualLoop, _>(&recorder, 50);
    dispatcher.parallel_for::<JacobianLoop, _>(&recorder, 10);
    dispatcher.fence();

    assert_eq!(recorder.residual.load(Ordering::Relaxed), 50);
    assert_eq!(recorder.jacobian.load(Ordering::Relaxed), 45);
    assert_eq!(recorder.device.load(Ordering::Relaxed), 0);
    assert_eq!(ResidualLoop::NAME, "ResidualLoop");
}

#[test]
fn device_dispatchers_run_work_items_in_device_space() {
    let recorder = Recorder::default();
    let dispatcher = Dispatcher::default();
    assert_eq!(dispatcher.space(), MemorySpace::Device);
    dispatcher.parallel_for::<ResidualLoop, _>(&recorder, 200);
    assert_eq!(recorder.device.load(Ordering::Relaxed), 200);
    assert_eq!(current_space(), MemorySpace::Host);
}

#[test]
fn stats_count_launches_and_elisions() {
    let recorder = Recorder::default();
    let dispatcher = Dispatcher::new(DispatchConfig {
        space: MemorySpace::Host,
        min_items_per_task: 0,
    });
    dispatcher.parallel_for::<ResidualLoop, _>(&recorder, 0);
    dispatcher.parallel_for::<ResidualLoop, _>(&recorder, 3);
    dispatcher.skip::<ElementLoop>("material");
    assert_eq!(dispatcher.stats(), LaunchStats { launches: 2, elided: 1 });

    dispatcher.reset_stats();
    assert_eq!(dispatcher.stats(), LaunchStats::default());
}
