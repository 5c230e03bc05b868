use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use voltprobe_platform::*;

fn synthetic_source(counters: &PowerCounters) -> Arc<StaticCounterSource> {
    let source = Arc::new(StaticCounterSource::new());
    source.set(counters.usb_current.primary(), "2000000\n");
    source.set(counters.usb_voltage.primary(), "5000000\n");
    source.set(counters.battery_current.primary(), "1000000\n");
    source.set(counters.battery_voltage.primary(), "4000000\n");
    source
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_average_stays_finite_while_lifecycle_is_toggled() {
    let counters = PowerCounters::with_supplies("/fake/power_supply", "usb", "battery");
    let source = synthetic_source(&counters);
    let options = SamplerOptions::new(Duration::from_micros(200)).counters(counters);
    let mut sampler = PowerSampler::with_source(options, source).unwrap();

    thread::scope(|scope| {
        let sampler = &sampler;
        scope.spawn(move || {
            for i in 0..200 {
                match i % 4 {
                    0 => sampler.start(),
                    1 => sampler.pause(),
                    2 => sampler.resume(),
                    _ => sampler.pause(),
                }
                thread::sleep(Duration::from_micros(300));
            }
            sampler.resume();
        });

        for _ in 0..200 {
            let avg = sampler.avg_power();
            assert!(avg.is_finite());
            assert!(avg >= 0.0);
            assert!(avg == 0.0 || avg == 14.0, "unexpected average {avg}");
            thread::sleep(Duration::from_micros(250));
        }
    });

    assert!(wait_until(|| sampler.sample_count() > 0));
    sampler.stop();

    let stats = sampler.stats();
    assert_eq!(stats.avg_power_watts, 14.0);
    assert_eq!(stats.skipped, 0);
}

#[test]
fn test_stopped_sampler_never_changes() {
    let counters = PowerCounters::default();
    let source = synthetic_source(&counters);
    let options = SamplerOptions::new(Duration::from_millis(1)).counters(counters);
    let mut sampler = PowerSampler::with_source(options, Arc::clone(&source)).unwrap();

    sampler.start();
    assert!(wait_until(|| sampler.sample_count() >= 5));
    sampler.stop();
    sampler.stop();

    let before = sampler.stats();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sampler.stats(), before);

    sampler.resume();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(sampler.stats(), before);
}

#[test]
fn test_counter_outage_is_skipped_then_recovers() {
    let counters = PowerCounters::default();
    let source = synthetic_source(&counters);
    source.set(counters.usb_current.primary(), "");
    let options = SamplerOptions::new(Duration::from_millis(1)).counters(counters.clone());
    let mut sampler = PowerSampler::with_source(options, Arc::clone(&source)).unwrap();

    sampler.start();
    assert!(wait_until(|| sampler.skipped_samples() >= 2));
    assert_eq!(sampler.avg_power(), 0.0);

    source.set(counters.usb_current.fallback().unwrap(), "2000000");
    assert!(wait_until(|| sampler.sample_count() >= 2));
    sampler.stop();

    assert_eq!(sampler.avg_power(), 14.0);
}
