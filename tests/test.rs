use std::{
    collections::BTreeMap,
    io::{Read, Write},
    net::TcpListener,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde_json::json;

use filament_sensor::config::constants;
use filament_sensor::error::{NotificationError, PrinterError};
use filament_sensor::*;

/// Print host stand-in that replays a scripted job state and can be told to
/// fail the next few calls.
struct FakePrinter {
    state: Mutex<JobState>,
    pauses: AtomicUsize,
    failing_queries: AtomicUsize,
    failing_pauses: AtomicUsize,
}

fn take_failure(counter: &AtomicUsize) -> Result<(), PrinterError> {
    let failed = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failed {
        return Err(PrinterError::ConnectionFailed {
            api_url: "http://octopi.test".to_string(),
            reason: "operation timed out".to_string(),
        });
    }
    Ok(())
}

impl FakePrinter {
    fn new(state: JobState) -> Self {
        Self {
            state: Mutex::new(state),
            pauses: AtomicUsize::new(0),
            failing_queries: AtomicUsize::new(0),
            failing_pauses: AtomicUsize::new(0),
        }
    }

    fn fail_next_queries(&self, count: usize) {
        self.failing_queries.store(count, Ordering::SeqCst);
    }

    fn fail_next_pauses(&self, count: usize) {
        self.failing_pauses.store(count, Ordering::SeqCst);
    }

    fn set_state(&self, state: JobState) {
        *self.state.lock().unwrap() = state;
    }

    fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

impl PrintControl for FakePrinter {
    fn job_state(&self) -> Result<JobState, PrinterError> {
        take_failure(&self.failing_queries)?;
        Ok(self.state.lock().unwrap().clone())
    }

    fn pause_print(&self) -> Result<(), PrinterError> {
        take_failure(&self.failing_pauses)?;
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.set_state(JobState::Paused);
        Ok(())
    }
}

fn sensor_with(
    settings: Settings,
    state: JobState,
) -> (
    FilamentSensor<FakePrinter>,
    Arc<MockGpioBackend>,
    tempfile::TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let gpio = Arc::new(MockGpioBackend::new());
    let sensor = FilamentSensor::new(
        settings,
        dir.path().join("filamentsensor.json"),
        gpio.clone(),
        FakePrinter::new(state),
        AlertService::new(),
    );
    (sensor, gpio, dir)
}

#[test]
fn test_debouncer_reports_runout_once_after_threshold() {
    let debouncer = RunoutDebouncer::new(10);
    for _ in 0..10 {
        assert!(!debouncer.register_pulse());
    }
    assert_eq!(debouncer.count(), 10);
    assert!(debouncer.register_pulse());
    assert!(!debouncer.register_pulse());
    assert_eq!(debouncer.count(), 10);

    debouncer.reset();
    assert_eq!(debouncer.count(), 0);
    for _ in 0..10 {
        assert!(!debouncer.register_pulse());
    }
    assert!(debouncer.register_pulse());
}

#[test]
fn test_settings_defaults() {
    let settings = Settings::default();
    assert_eq!(settings.gpio_pin, 8);
    assert_eq!(settings.mode, EdgeMode::Rising);
    assert_eq!(settings.pull_up_down, PullMode::Down);
    assert!(!settings.send_mail);
    assert!(settings.mail_receiver.is_empty());
    assert!(settings.webhooks.is_empty());
    assert_eq!(settings.smtp_port(), constants::DEFAULT_SMTP_PORT);
}

#[test]
fn test_settings_accept_legacy_values() {
    let raw = r#"{
        "gpio_pin": 17,
        "mode": "GPIO.FALLING",
        "pull_up_down": "GPIO.PUD_UP",
        "send_mail": true,
        "mail_port": "",
        "mail_receiver": ["ops@example.com"],
        "webhooks": [
            {"enabled": true, "type": "post", "url": "http://hooks.local/runout", "data": {"printer": "mk3"}},
            {"enabled": false, "type": "get", "url": "http://hooks.local/ping", "data": "a=1"}
        ]
    }"#;
    let settings: Settings = serde_json::from_str(raw).unwrap();

    assert_eq!(settings.gpio_pin, 17);
    assert_eq!(settings.mode, EdgeMode::Falling);
    assert_eq!(settings.pull_up_down, PullMode::Up);
    assert_eq!(settings.mail_port, None);
    assert_eq!(settings.mail_subject, Settings::default().mail_subject);
    assert_eq!(settings.webhooks[0].method, WebhookMethod::Post);
    assert_eq!(
        settings.webhooks[0].data,
        WebhookPayload::Fields(BTreeMap::from([("printer".to_string(), json!("mk3"))]))
    );
    assert_eq!(settings.webhooks[1].data, WebhookPayload::Raw("a=1".to_string()));

    let with_port: Settings = serde_json::from_str(r#"{"mail_port": "587"}"#).unwrap();
    assert_eq!(with_port.smtp_port(), 587);
    let numeric: Settings = serde_json::from_str(r#"{"mail_port": 2525}"#).unwrap();
    assert_eq!(numeric.mail_port, Some(2525));
}

#[test]
fn test_settings_validation() {
    let mut settings = Settings::default();
    assert!(settings.validate().is_ok());

    settings.gpio_pin = 40;
    assert!(settings.validate().is_err());

    settings.gpio_pin = 4;
    settings.webhooks.push(Webhook {
        enabled: false,
        method: WebhookMethod::Get,
        url: "not a url".to_string(),
        data: WebhookPayload::default(),
    });
    assert!(settings.validate().is_ok(), "disabled webhooks are not checked");

    settings.webhooks[0].enabled = true;
    assert!(settings.validate().is_err());
}

#[test]
fn test_settings_file_handling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    assert_eq!(Settings::load(&path).unwrap(), Settings::default());

    let mut settings = Settings::default();
    settings.gpio_pin = 23;
    settings.mail_receiver.push("ops@example.com".to_string());
    settings.save(&path).unwrap();
    assert_eq!(Settings::load(&path).unwrap(), settings);

    std::fs::write(&path, "{ not json").unwrap();
    assert!(Settings::load(&path).is_err());
}

#[test]
fn test_settings_accept_non_string_webhook_fields() {
    let raw = r#"{"webhooks": [
        {"enabled": true, "type": "post", "url": "http://hooks.local/runout",
         "data": {"count": 3, "urgent": true, "ratio": 0.5, "note": null}}
    ]}"#;
    let settings: Settings = serde_json::from_str(raw).unwrap();
    match &settings.webhooks[0].data {
        WebhookPayload::Fields(fields) => {
            assert_eq!(fields["count"], json!(3));
            assert_eq!(fields["urgent"], json!(true));
            assert_eq!(fields.len(), 4);
        }
        other => panic!("expected fields, got {:?}", other),
    }
}

#[test]
fn test_settings_save_leaves_no_temporary_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    Settings::default().save(&path).unwrap();
    let mut updated = Settings::default();
    updated.gpio_pin = 5;
    updated.save(&path).unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("settings.json")]);
    assert_eq!(Settings::load(&path).unwrap().gpio_pin, 5);
}

#[test]
fn test_settings_save_into_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("settings.json");
    assert!(Settings::default().save(&path).is_err());
}

/// Polls `watcher` until it reports a change or two seconds pass.
fn wait_for_change(watcher: &mut SettingsWatcher) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if watcher.changed() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn test_settings_watcher_reports_saves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let mut watcher = SettingsWatcher::new(&path).unwrap();
    assert!(!watcher.changed());

    Settings::default().save(&path).unwrap();
    assert!(wait_for_change(&mut watcher));

    // Unrelated files in the same directory are ignored.
    thread::sleep(Duration::from_millis(200));
    watcher.changed();
    std::fs::write(dir.path().join("other.txt"), "x").unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(!watcher.changed());

    let mut updated = Settings::default();
    updated.gpio_pin = 22;
    updated.save(&path).unwrap();
    assert!(wait_for_change(&mut watcher));
}

#[test]
fn test_config_from_vars() {
    let vars = BTreeMap::from([
        ("OCTOPRINT_URL", "http://octopi.local/"),
        ("OCTOPRINT_API_KEY", "secret"),
    ]);
    let config = Config::from_vars(|key| vars.get(key).map(|v| v.to_string())).unwrap();
    assert_eq!(config.octoprint_url, "http://octopi.local");
    assert_eq!(config.octoprint_api_key, "secret");
    assert_eq!(
        config.settings_file,
        std::path::PathBuf::from("./filamentsensor.json")
    );
    assert_eq!(config.poll_interval, Duration::from_secs(2));

    assert!(Config::from_vars(|_| None).is_err());

    let bad_interval = |key: &str| match key {
        "POLL_INTERVAL_SECONDS" => Some("0".to_string()),
        other => vars.get(other).map(|v| v.to_string()),
    };
    assert!(Config::from_vars(bad_interval).is_err());
}

#[test]
fn test_job_state_parsing() {
    assert_eq!(JobState::parse("Printing from SD"), JobState::Printing);
    assert_eq!(JobState::parse("Offline after error"), JobState::Offline);
    assert_eq!(JobState::parse("Operational"), JobState::Operational);
    assert!(JobState::parse("Paused").is_active());
    assert!(!JobState::parse("Operational").is_active());
    assert_eq!(
        JobState::parse("Detecting baudrate"),
        JobState::Other("Detecting baudrate".to_string())
    );
}

#[test]
fn test_event_tracker_lifecycle() {
    let mut tracker = PrintEventTracker::new();
    assert_eq!(tracker.observe(JobState::Operational), None);
    assert_eq!(tracker.observe(JobState::Printing), Some(PrintEvent::Started));
    assert_eq!(tracker.observe(JobState::Printing), None);
    assert_eq!(tracker.observe(JobState::Paused), None);
    assert_eq!(tracker.observe(JobState::Printing), None);
    assert_eq!(tracker.observe(JobState::Operational), Some(PrintEvent::Done));

    assert_eq!(tracker.observe(JobState::Starting), Some(PrintEvent::Started));
    assert_eq!(tracker.observe(JobState::Printing), None);
    assert_eq!(tracker.observe(JobState::Cancelling), None);
    assert_eq!(
        tracker.observe(JobState::Operational),
        Some(PrintEvent::Cancelled)
    );

    assert_eq!(tracker.observe(JobState::Printing), Some(PrintEvent::Started));
    assert_eq!(tracker.observe(JobState::Error), Some(PrintEvent::Failed));
}

#[test]
fn test_event_tracker_starts_mid_print() {
    let mut tracker = PrintEventTracker::new();
    assert_eq!(tracker.observe(JobState::Printing), Some(PrintEvent::Started));
}

#[test]
fn test_startup_configures_pin() {
    let mut settings = Settings::default();
    settings.pull_up_down = PullMode::Up;
    let (mut sensor, gpio, _dir) = sensor_with(settings, JobState::Operational);

    sensor.on_startup().unwrap();
    assert_eq!(gpio.pull_mode(8), Some(PullMode::Up));
    assert!(!gpio.is_armed(8));
}

#[test]
fn test_runout_pauses_running_print() {
    let (mut sensor, gpio, _dir) = sensor_with(Settings::default(), JobState::Printing);
    sensor.on_startup().unwrap();

    assert_eq!(sensor.poll().unwrap(), Some(PrintEvent::Started));
    assert!(sensor.is_armed());
    assert!(gpio.is_armed(8));
    assert_eq!(gpio.edge_mode(8), Some(EdgeMode::Rising));

    for _ in 0..constants::RUNOUT_PULSE_THRESHOLD {
        assert!(gpio.pulse(8));
    }
    assert_eq!(sensor.pulse_count(), 10);
    assert_eq!(sensor.wait_for_runout(Duration::from_millis(10)), None);

    assert!(gpio.pulse(8));
    assert_eq!(sensor.wait_for_runout(Duration::from_millis(10)), Some(8));

    match sensor.filament_run_out().unwrap() {
        RunoutOutcome::Paused(report) => {
            assert_eq!(report.mails_sent, 0);
            assert_eq!(report.webhooks_called, 0);
            assert!(report.failures.is_empty());
        }
        other => panic!("expected a pause, got {:?}", other),
    }
    assert_eq!(sensor.printer().pauses(), 1);
    assert!(!sensor.is_armed());
    assert!(!gpio.is_armed(8));

    // Resuming after a runout pause does not re-arm the sensor.
    sensor.printer().set_state(JobState::Printing);
    assert_eq!(sensor.poll().unwrap(), None);
    assert!(!gpio.is_armed(8));
}

#[test]
fn test_runout_while_idle_does_not_pause() {
    let (mut sensor, gpio, _dir) = sensor_with(Settings::default(), JobState::Printing);
    sensor.on_startup().unwrap();
    sensor.on_event(PrintEvent::Started).unwrap();

    sensor.printer().set_state(JobState::Operational);
    assert!(matches!(
        sensor.filament_run_out().unwrap(),
        RunoutOutcome::NotPrinting
    ));
    assert_eq!(sensor.printer().pauses(), 0);
    assert!(!gpio.is_armed(8));
}

#[test]
fn test_print_start_resets_counter_and_stop_disarms() {
    let (mut sensor, gpio, _dir) = sensor_with(Settings::default(), JobState::Printing);
    sensor.on_startup().unwrap();

    sensor.on_event(PrintEvent::Started).unwrap();
    for _ in 0..4 {
        gpio.pulse(8);
    }
    assert_eq!(sensor.pulse_count(), 4);

    sensor.on_event(PrintEvent::Cancelled).unwrap();
    assert!(!gpio.is_armed(8));
    assert!(!gpio.pulse(8));

    // Stopping twice must not fail even though nothing is attached.
    sensor.on_event(PrintEvent::Done).unwrap();

    sensor.on_event(PrintEvent::Started).unwrap();
    assert_eq!(sensor.pulse_count(), 0);
    assert!(gpio.is_armed(8));
}

/// Arms the sensor for a running print and trips it.
fn trip_runout(sensor: &mut FilamentSensor<FakePrinter>, gpio: &MockGpioBackend) {
    sensor.on_startup().unwrap();
    assert_eq!(sensor.poll().unwrap(), Some(PrintEvent::Started));
    for _ in 0..=constants::RUNOUT_PULSE_THRESHOLD {
        assert!(gpio.pulse(8));
    }
    assert_eq!(sensor.wait_for_runout(Duration::from_millis(10)), Some(8));
}

#[test]
fn test_runout_retried_after_printer_errors() {
    let (mut sensor, gpio, _dir) = sensor_with(Settings::default(), JobState::Printing);
    trip_runout(&mut sensor, &gpio);

    sensor.printer().fail_next_queries(1);
    assert!(matches!(
        sensor.filament_run_out(),
        Err(FilamentSensorError::PrinterError(_))
    ));
    assert!(sensor.runout_pending());
    assert!(!gpio.is_armed(8));

    // The print keeps running, so nothing re-arms the sensor meanwhile.
    assert_eq!(sensor.poll().unwrap(), None);
    assert!(sensor.runout_pending());
    assert_eq!(sensor.wait_for_runout(Duration::from_millis(10)), None);

    sensor.printer().fail_next_pauses(1);
    assert!(sensor.filament_run_out().is_err());
    assert!(sensor.runout_pending());
    assert_eq!(sensor.printer().pauses(), 0);

    assert!(matches!(
        sensor.filament_run_out().unwrap(),
        RunoutOutcome::Paused(_)
    ));
    assert!(!sensor.runout_pending());
    assert_eq!(sensor.printer().pauses(), 1);
}

#[test]
fn test_pending_runout_dropped_when_print_ends() {
    let (mut sensor, gpio, _dir) = sensor_with(Settings::default(), JobState::Printing);
    trip_runout(&mut sensor, &gpio);

    sensor.printer().fail_next_queries(1);
    assert!(sensor.filament_run_out().is_err());
    assert!(sensor.runout_pending());

    sensor.printer().set_state(JobState::Cancelling);
    assert_eq!(sensor.poll().unwrap(), None);
    sensor.printer().set_state(JobState::Operational);
    assert_eq!(sensor.poll().unwrap(), Some(PrintEvent::Cancelled));
    assert!(!sensor.runout_pending());
    assert_eq!(sensor.printer().pauses(), 0);
}

#[test]
fn test_failed_arm_is_retried_on_next_poll() {
    let (mut sensor, gpio, _dir) = sensor_with(Settings::default(), JobState::Printing);
    sensor.on_startup().unwrap();

    gpio.fail_next_arm();
    assert!(matches!(
        sensor.poll(),
        Err(FilamentSensorError::GpioError(_))
    ));
    assert!(!gpio.is_armed(8));
    assert!(!sensor.is_armed());

    assert_eq!(sensor.poll().unwrap(), Some(PrintEvent::Started));
    assert!(gpio.is_armed(8));
    assert_eq!(sensor.poll().unwrap(), None);
}

#[test]
fn test_settings_save_moves_armed_sensor() {
    let (mut sensor, gpio, dir) = sensor_with(Settings::default(), JobState::Printing);
    sensor.on_startup().unwrap();
    sensor.on_event(PrintEvent::Started).unwrap();
    gpio.pulse(8);

    let mut updated = Settings::default();
    updated.gpio_pin = 17;
    updated.mode = EdgeMode::Both;
    updated.pull_up_down = PullMode::Off;
    sensor.on_settings_save(updated.clone()).unwrap();

    assert_eq!(gpio.pull_mode(8), None);
    assert_eq!(gpio.pull_mode(17), Some(PullMode::Off));
    assert!(gpio.is_armed(17));
    assert_eq!(gpio.edge_mode(17), Some(EdgeMode::Both));
    assert_eq!(sensor.pulse_count(), 1);
    assert_eq!(sensor.settings(), &updated);

    let saved = Settings::load(&dir.path().join("filamentsensor.json")).unwrap();
    assert_eq!(saved, updated);
}

#[test]
fn test_settings_save_rejects_invalid_pin() {
    let (mut sensor, gpio, dir) = sensor_with(Settings::default(), JobState::Operational);
    sensor.on_startup().unwrap();

    let mut invalid = Settings::default();
    invalid.gpio_pin = 99;
    assert!(sensor.on_settings_save(invalid).is_err());
    assert_eq!(sensor.settings().gpio_pin, 8);
    assert_eq!(gpio.pull_mode(8), Some(PullMode::Down));
    assert!(!dir.path().join("filamentsensor.json").exists());
}

#[test]
fn test_mock_backend_requires_setup() {
    let gpio = MockGpioBackend::new();
    let result = gpio.add_event_detect(
        5,
        EdgeMode::Rising,
        Duration::from_millis(500),
        Box::new(|| {}),
    );
    assert!(result.is_err());
    assert!(gpio.remove_event_detect(5).is_err());
    assert!(!gpio.pulse(5));
}

#[test]
fn test_mail_requires_server() {
    let mut settings = Settings::default();
    settings.send_mail = true;
    settings.mail_receiver.push("ops@example.com".to_string());

    let alerts = AlertService::new();
    let (sent, failures) = alerts.send_mail(&settings);
    assert_eq!(sent, 0);
    match failures.as_slice() {
        [NotificationError::MailNotConfigured { field }] => assert_eq!(field, "mail_server"),
        other => panic!("expected missing server error, got {:?}", other),
    }

    let report = alerts.notify_runout(&settings);
    assert_eq!(report.mails_sent, 0);
    assert_eq!(report.failures.len(), 1);
}

#[test]
fn test_webhooks_skip_disabled_and_report_failures() {
    let webhooks = vec![
        Webhook {
            enabled: false,
            method: WebhookMethod::Post,
            url: "http://127.0.0.1:9/disabled".to_string(),
            data: WebhookPayload::default(),
        },
        Webhook {
            enabled: true,
            method: WebhookMethod::Get,
            url: "http://127.0.0.1:9/runout".to_string(),
            data: WebhookPayload::Raw("printer=mk3".to_string()),
        },
    ];

    let (called, failures) = AlertService::new().call_webhooks(&webhooks);
    assert_eq!(called, 0);
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        NotificationError::WebhookFailed { url, .. } if url.ends_with("/runout")
    ));
}

#[test]
fn test_mail_failures_are_collected_per_receiver() {
    let mut settings = Settings::default();
    settings.send_mail = true;
    settings.mail_server = "127.0.0.1".to_string();
    settings.mail_port = Some(9);
    settings.mail_user = "sensor@example.com".to_string();
    settings.mail_receiver = vec![
        "not an address".to_string(),
        "ops@example.com".to_string(),
    ];

    let (sent, failures) = AlertService::new().send_mail(&settings);
    assert_eq!(sent, 0);
    assert_eq!(failures.len(), 2);
    assert!(matches!(
        &failures[0],
        NotificationError::InvalidAddress { address, .. } if address == "not an address"
    ));
    assert!(matches!(
        &failures[1],
        NotificationError::MailFailed { receiver, .. } if receiver == "ops@example.com"
    ));
}

/// Answers a single HTTP request with `status` and hands back the raw
/// request text.
fn serve_once(status: u16) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&raw[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }

        let reply = format!(
            "HTTP/1.1 {} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status
        );
        stream.write_all(reply.as_bytes()).unwrap();
        String::from_utf8(raw).unwrap()
    });

    (base, handle)
}

fn webhook(method: WebhookMethod, url: String, data: WebhookPayload) -> Vec<Webhook> {
    vec![Webhook {
        enabled: true,
        method,
        url,
        data,
    }]
}

#[test]
fn test_post_webhook_sends_form_body() {
    let (base, server) = serve_once(200);
    let fields = BTreeMap::from([
        ("printer".to_string(), json!("mk3")),
        ("count".to_string(), json!(3)),
        ("urgent".to_string(), json!(true)),
    ]);
    let hooks = webhook(
        WebhookMethod::Post,
        format!("{}/hook", base),
        WebhookPayload::Fields(fields),
    );

    let (called, failures) = AlertService::new().call_webhooks(&hooks);
    assert_eq!(called, 1);
    assert!(failures.is_empty());

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /hook HTTP/1.1\r\n"));
    assert!(
        request
            .to_lowercase()
            .contains("content-type: application/x-www-form-urlencoded")
    );
    assert!(request.ends_with("\r\n\r\ncount=3&printer=mk3&urgent=true"));
}

#[test]
fn test_get_webhook_sends_query_parameters() {
    let (base, server) = serve_once(200);
    let fields = BTreeMap::from([("printer".to_string(), json!("mk3"))]);
    let hooks = webhook(
        WebhookMethod::Get,
        format!("{}/hook", base),
        WebhookPayload::Fields(fields),
    );

    let (called, failures) = AlertService::new().call_webhooks(&hooks);
    assert_eq!(called, 1);
    assert!(failures.is_empty());
    assert!(
        server
            .join()
            .unwrap()
            .starts_with("GET /hook?printer=mk3 HTTP/1.1\r\n")
    );
}

#[test]
fn test_get_webhook_appends_raw_query() {
    let (base, server) = serve_once(204);
    let hooks = webhook(
        WebhookMethod::Get,
        format!("{}/hook?source=pi", base),
        WebhookPayload::Raw("filament=out".to_string()),
    );

    let (called, failures) = AlertService::new().call_webhooks(&hooks);
    assert_eq!(called, 1);
    assert!(failures.is_empty());
    assert!(
        server
            .join()
            .unwrap()
            .starts_with("GET /hook?source=pi&filament=out HTTP/1.1\r\n")
    );
}

#[test]
fn test_post_webhook_sends_raw_body() {
    let (base, server) = serve_once(200);
    let mut settings = Settings::default();
    settings.webhooks = webhook(
        WebhookMethod::Post,
        format!("{}/hook", base),
        WebhookPayload::Raw(r#"{"event":"runout"}"#.to_string()),
    );

    let report = AlertService::new().notify_runout(&settings);
    assert_eq!(report.webhooks_called, 1);
    assert!(report.failures.is_empty());

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /hook HTTP/1.1\r\n"));
    assert!(request.ends_with("\r\n\r\n{\"event\":\"runout\"}"));
}

#[test]
fn test_webhook_error_status_is_a_failure() {
    let (base, server) = serve_once(500);
    let hooks = webhook(
        WebhookMethod::Post,
        format!("{}/hook", base),
        WebhookPayload::default(),
    );

    let (called, failures) = AlertService::new().call_webhooks(&hooks);
    server.join().unwrap();
    assert_eq!(called, 0);
    assert!(matches!(
        &failures[..],
        [NotificationError::WebhookFailed { reason, .. }] if reason.contains("500")
    ));
}

#[test]
fn test_printer_service_unreachable() {
    // Nothing listens on the discard port, so every call must fail cleanly.
    let url = "http://127.0.0.1:9".to_string();
    let printer = PrinterService::new(url.clone(), "key".to_string());
    assert_eq!(printer.api_url, url);
    assert!(matches!(
        printer.job_state(),
        Err(PrinterError::ConnectionFailed { .. })
    ));
    assert!(printer.pause_print().is_err());
    assert!(printer.is_printing().is_err());
}
