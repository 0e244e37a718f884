//! Integration tests for sampling
//!
//! These tests use a mock proc filesystem and a scripted sample source to
//! exercise parsing and the watch loop without touching the real host.

#[cfg(test)]
mod mock_procfs_tests {
    use crate::collector::{ProcfsSource, SampleSource};
    use crate::error::DiagError;
    use crate::test_support::MeminfoFixture;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tokio::fs;

    /// A full `/proc/<pid>/status`; kernel threads have no Vm lines
    fn status_file(name: &str, pid: u32, rss_kb: Option<u64>, threads: u64) -> String {
        let mut status = format!(
            "Name:\t{name}\nUmask:\t0022\nState:\tS (sleeping)\nTgid:\t{pid}\nNgid:\t0\n\
Pid:\t{pid}\nPPid:\t1\nTracerPid:\t0\nUid:\t1000\t1000\t1000\t1000\n\
Gid:\t1000\t1000\t1000\t1000\nFDSize:\t64\nGroups:\t1000 \nNStgid:\t{pid}\n\
NSpid:\t{pid}\nNSpgid:\t{pid}\nNSsid:\t{pid}\n"
        );
        if let Some(rss) = rss_kb {
            status.push_str(&format!(
                "VmPeak:\t  120000 kB\nVmSize:\t  110000 kB\nVmLck:\t       0 kB\n\
VmPin:\t       0 kB\nVmHWM:\t{rss:>8} kB\nVmRSS:\t{rss:>8} kB\n\
RssAnon:\t{rss:>8} kB\nRssFile:\t       0 kB\nRssShmem:\t       0 kB\n\
VmData:\t   70000 kB\nVmStk:\t     132 kB\nVmExe:\t    2000 kB\n\
VmLib:\t    8000 kB\nVmPTE:\t     200 kB\nVmSwap:\t       0 kB\n"
            ));
        }
        status.push_str(&format!(
            "HugetlbPages:\t       0 kB\nCoreDumping:\t0\nTHP_enabled:\t1\n\
Threads:\t{threads}\nSigQ:\t0/63457\nSigPnd:\t0000000000000000\n\
ShdPnd:\t0000000000000000\nSigBlk:\t0000000000000000\nSigIgn:\t0000000000001000\n\
SigCgt:\t0000000180004002\nCapInh:\t0000000000000000\nCapPrm:\t0000000000000000\n\
CapEff:\t0000000000000000\nCapBnd:\t000001ffffffffff\nCapAmb:\t0000000000000000\n\
NoNewPrivs:\t0\nSeccomp:\t0\nSeccomp_filters:\t0\n\
Speculation_Store_Bypass:\tthread vulnerable\n\
SpeculationIndirectBranch:\tconditional enabled\nCpus_allowed:\tff\n\
Cpus_allowed_list:\t0-7\nMems_allowed:\t00000000,00000001\nMems_allowed_list:\t0\n\
voluntary_ctxt_switches:\t150\nnonvoluntary_ctxt_switches:\t3\n"
        ));
        status
    }

    /// A full 52-field `/proc/<pid>/stat` line
    fn stat_file(pid: u32, comm: &str, minflt: u64, majflt: u64, threads: u64) -> String {
        format!(
            "{pid} ({comm}) S 1 {pid} {pid} 0 -1 4194560 {minflt} 0 {majflt} 0 1 1 0 0 20 0 \
{threads} 0 100 112640000 12800 18446744073709551615 94000000000000 94000002000000 \
140700000000000 0 0 0 0 4096 16386 0 0 0 17 3 0 0 0 0 0 94000004000000 \
94000004100000 94000010000000 140700000010000 140700000010100 140700000010100 \
140700000020000 0\n"
        )
    }

    async fn write_process(proc_root: &Path, pid: u32, comm: &str) {
        let pid_dir = proc_root.join(pid.to_string());
        fs::create_dir_all(pid_dir.join("fd")).await.unwrap();

        fs::write(pid_dir.join("status"), status_file(comm, pid, Some(51200), 6))
            .await
            .unwrap();
        fs::write(pid_dir.join("stat"), stat_file(pid, comm, 300, 12, 6))
            .await
            .unwrap();

        let smaps = "Rss:   51200 kB\nPss:   40960 kB\nPrivate_Clean:  1024 kB\nPrivate_Dirty:  30720 kB\n";
        fs::write(pid_dir.join("smaps_rollup"), smaps).await.unwrap();

        fs::write(pid_dir.join("comm"), format!("{}\n", comm)).await.unwrap();
        fs::write(pid_dir.join("cmdline"), "/usr/bin/worker\0--threads\04\0").await.unwrap();

        // Descriptor links only need a target string
        let fd_dir = pid_dir.join("fd");
        std::os::unix::fs::symlink("/dev/null", fd_dir.join("0")).unwrap();
        std::os::unix::fs::symlink("/var/log/worker.log", fd_dir.join("1")).unwrap();
        std::os::unix::fs::symlink("socket:[48213]", fd_dir.join("2")).unwrap();
    }

    /// Helper to create a mock /proc with meminfo and one process
    async fn create_mock_proc(temp_dir: &TempDir, pid: u32) -> PathBuf {
        let proc_root = temp_dir.path().to_path_buf();
        let meminfo = MeminfoFixture {
            swap_total_kb: 1_000_000,
            swap_free_kb: 900_000,
            ..MeminfoFixture::default()
        };
        fs::write(proc_root.join("meminfo"), meminfo.render()).await.unwrap();
        write_process(&proc_root, pid, "worker").await;
        proc_root
    }

    #[tokio::test]
    async fn test_read_system_memory() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 100).await;
        let source = ProcfsSource::with_proc_root(&proc_root);

        let memory = source.read_system_memory().await.unwrap();
        assert!((memory.used_percent - 75.0).abs() < 1e-9);
        assert!((memory.swap_percent.unwrap() - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_meminfo_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let source = ProcfsSource::with_proc_root(temp_dir.path());

        let err = source.read_system_memory().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_read_process_metrics() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 4242).await;
        let source = ProcfsSource::with_proc_root(&proc_root);

        let metrics = source.read_process_metrics(4242).await.unwrap();
        assert_eq!(metrics.rss, 51200 * 1024);
        assert_eq!(metrics.pss, Some(40960 * 1024));
        assert_eq!(metrics.uss, Some(31744 * 1024));
        assert_eq!(metrics.threads, 6);
        assert_eq!(metrics.fds, 3);
        assert_eq!(metrics.connections, 1);
        assert_eq!(metrics.page_faults(), 312);
    }

    #[tokio::test]
    async fn test_command_name_with_parentheses() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 1).await;
        write_process(&proc_root, 55, "my (odd) app").await;
        let source = ProcfsSource::with_proc_root(&proc_root);

        let metrics = source.read_process_metrics(55).await.unwrap();
        assert_eq!(metrics.minor_faults, 300);
        assert_eq!(metrics.major_faults, 12);

        let identity = source.process_identity(55).await.unwrap();
        assert_eq!(identity.name, "my (odd) app");
    }

    #[tokio::test]
    async fn test_missing_smaps_is_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 7).await;
        fs::remove_file(proc_root.join("7").join("smaps_rollup")).await.unwrap();
        let source = ProcfsSource::with_proc_root(&proc_root);

        let metrics = source.read_process_metrics(7).await.unwrap();
        assert_eq!(metrics.uss, None);
        assert_eq!(metrics.pss, None);
    }

    #[tokio::test]
    async fn test_vanished_process_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 1).await;
        let source = ProcfsSource::with_proc_root(&proc_root);

        let err = source.read_process_metrics(999).await.unwrap_err();
        assert!(err.is_transient());
        match err {
            DiagError::SampleUnavailable { subject, reason } => {
                assert_eq!(subject, "pid 999");
                assert_eq!(reason, "process exited");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_kernel_thread_has_no_rss() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 1).await;
        let kthread = proc_root.join("2");
        fs::create_dir_all(&kthread).await.unwrap();
        fs::write(kthread.join("status"), status_file("kthreadd", 2, None, 1))
            .await
            .unwrap();
        let source = ProcfsSource::with_proc_root(&proc_root);

        let err = source.read_process_metrics(2).await.unwrap_err();
        assert!(err.to_string().contains("no resident memory"));
    }

    #[tokio::test]
    async fn test_list_processes_and_identity() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 31).await;
        // Kernel thread without VmRSS is not listed
        let kthread = proc_root.join("2");
        fs::create_dir_all(&kthread).await.unwrap();
        fs::write(kthread.join("status"), status_file("kthreadd", 2, None, 1))
            .await
            .unwrap();
        // Non-numeric entries are ignored
        fs::create_dir_all(proc_root.join("self")).await.unwrap();

        let source = ProcfsSource::with_proc_root(&proc_root);
        let processes = source.list_processes().await.unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].pid, 31);
        assert_eq!(processes[0].name, "worker");
        assert_eq!(processes[0].rss, 51200 * 1024);

        let identity = source.process_identity(31).await.unwrap();
        assert_eq!(identity.name, "worker");
        assert_eq!(identity.cmdline, "/usr/bin/worker --threads 4");
    }
}

#[cfg(test)]
mod watch_loop_tests {
    use crate::anomaly::{DetectorConfig, ThresholdConfig, ThresholdRule};
    use crate::collector::{WatchEvent, WatchLoopBuilder};
    use crate::models::{Subject, SystemMemory};
    use crate::observability::DiagMetrics;
    use crate::shutdown::{self, Shutdown};
    use crate::test_support::{rss_readings, ScriptedSource};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_detector() -> DetectorConfig {
        DetectorConfig {
            window_size: 5,
            ..DetectorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_growing_system_memory_alerts_once() {
        let source = Arc::new(ScriptedSource::new().with_system(
            [40.0, 42.0, 44.0, 46.0, 48.0, 50.0, 52.0].map(Some),
        ));
        let metrics = DiagMetrics::new().unwrap();

        let (watch_loop, mut rx) = WatchLoopBuilder::new()
            .source(source)
            .detector(fast_detector())
            .interval(Duration::from_millis(5))
            .count(Some(7))
            .metrics(metrics.clone())
            .build()
            .unwrap();

        let summary = watch_loop.run(Shutdown::never()).await;
        assert_eq!(summary.ticks, 7);
        assert_eq!(summary.recorded, 7);
        assert_eq!(summary.alerts_fired, 1);
        assert!(!summary.interrupted);

        let mut alerts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WatchEvent::Alert(alert) = event {
                alerts.push(alert);
            }
        }
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subject, Subject::System);
        assert_eq!(alerts[0].window_samples, 5);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("memdiag_leak_alerts_total{subject=\"system\"} 1"));
    }

    #[tokio::test]
    async fn test_unavailable_samples_are_skipped() {
        let source = Arc::new(
            ScriptedSource::new().with_system([Some(10.0), None, Some(10.0), None]),
        );

        let (watch_loop, mut rx) = WatchLoopBuilder::new()
            .source(source)
            .detector(fast_detector())
            .interval(Duration::from_millis(5))
            .count(Some(4))
            .build()
            .unwrap();

        let summary = watch_loop.run(Shutdown::never()).await;
        assert_eq!(summary.ticks, 4);
        assert_eq!(summary.recorded, 2);
        assert_eq!(summary.skipped, 2);

        let skipped = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, WatchEvent::Skipped { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[tokio::test]
    async fn test_process_subject_tracks_rss() {
        let source = Arc::new(ScriptedSource::new().with_process(
            77,
            "leaky",
            rss_readings(&[1000, 1100, 1200, 1300, 1400]),
        ));

        let (watch_loop, mut rx) = WatchLoopBuilder::new()
            .source(source)
            .subject(Subject::Process { pid: 77 })
            .detector(fast_detector())
            .interval(Duration::from_millis(5))
            .count(Some(5))
            .build()
            .unwrap();

        let summary = watch_loop.run(Shutdown::never()).await;
        assert_eq!(summary.alerts_fired, 1);

        let last_value = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                WatchEvent::Sample { value, .. } => Some(value),
                _ => None,
            })
            .last();
        assert_eq!(last_value, Some(1400.0));
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let source = Arc::new(ScriptedSource::new().with_system((0..1000).map(|_| Some(10.0))));
        let (trigger, shutdown) = shutdown::channel();

        let (watch_loop, _rx) = WatchLoopBuilder::new()
            .source(source)
            .interval(Duration::from_millis(10))
            .build()
            .unwrap();

        let handle = tokio::spawn(watch_loop.run(shutdown));
        tokio::time::sleep(Duration::from_millis(35)).await;
        trigger.trigger();

        let summary = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop stopped")
            .unwrap();
        assert!(summary.interrupted);
        assert!(summary.ticks < 1000);
    }

    #[tokio::test]
    async fn test_memory_pressure_fires_threshold_rules() {
        let reading = |used_percent: f64, swap: f64| {
            Some(SystemMemory {
                used_percent,
                swap_percent: Some(swap),
            })
        };
        // Flat readings never look like a leak, only the fixed limits apply
        let source = Arc::new(ScriptedSource::new().with_system_memory([
            reading(70.0, 10.0),
            reading(90.0, 10.0),
            reading(90.0, 60.0),
            reading(97.0, 60.0),
        ]));
        let metrics = DiagMetrics::new().unwrap();

        let (watch_loop, mut rx) = WatchLoopBuilder::new()
            .source(source)
            .detector(fast_detector())
            .thresholds(ThresholdConfig {
                swap_percent: 50.0,
                ..ThresholdConfig::default()
            })
            .interval(Duration::from_millis(5))
            .count(Some(4))
            .metrics(metrics.clone())
            .build()
            .unwrap();

        let summary = watch_loop.run(Shutdown::never()).await;
        assert_eq!(summary.threshold_alerts, 3);
        assert_eq!(summary.alerts_fired, 3);

        let fired: Vec<ThresholdRule> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                WatchEvent::Threshold(alert) => Some(alert.rule),
                _ => None,
            })
            .collect();
        // High memory stays inside its cooldown after the first alert
        assert_eq!(
            fired,
            vec![
                ThresholdRule::HighMemory,
                ThresholdRule::HighSwap,
                ThresholdRule::CriticalMemory,
            ]
        );

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("memdiag_threshold_alerts_total{rule=\"high_memory\"} 1"));
        assert!(text.contains("memdiag_swap_percent 60"));
    }

    #[tokio::test]
    async fn test_process_subject_skips_threshold_rules() {
        let source = Arc::new(ScriptedSource::new().with_process(
            9,
            "steady",
            rss_readings(&[1000, 1000, 1000]),
        ));

        let (watch_loop, mut rx) = WatchLoopBuilder::new()
            .source(source)
            .subject(Subject::Process { pid: 9 })
            .detector(fast_detector())
            .interval(Duration::from_millis(5))
            .count(Some(3))
            .build()
            .unwrap();

        let summary = watch_loop.run(Shutdown::never()).await;
        assert_eq!(summary.threshold_alerts, 0);
        assert!(!std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| matches!(e, WatchEvent::Threshold(_))));
    }
}
