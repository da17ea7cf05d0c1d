//! The running control panel: one transport, one speed setting, and at most
//! one active input session at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rcpanel_kernel::{DebounceState, Decision};
use rcpanel_middleware::{LoopbackTransport, MqttTransport, StatusBus};
use rcpanel_runtime::{
    ClassifierSource, ControlSession, Intent, ReplayClassifier, SessionHandle, SessionSummary,
    SpeedControl,
};
use rcpanel_types::{CommandTopic, IntentSample, Modality, RcError, Speed, Transport};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::drive::TerminalKeyboard;

/// The link to the device, real or simulated.
pub enum Link {
    Mqtt {
        transport: Arc<MqttTransport>,
        shutdown: watch::Sender<bool>,
        driver: JoinHandle<()>,
    },
    Loopback(Arc<LoopbackTransport>),
}

impl Link {
    fn transport(&self) -> Arc<dyn Transport> {
        match self {
            Link::Mqtt { transport, .. } => transport.clone(),
            Link::Loopback(transport) => transport.clone(),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Link::Mqtt { .. } => "mqtt",
            Link::Loopback(_) => "loopback (dry run)",
        }
    }
}

pub struct Panel {
    runtime: Handle,
    config: Config,
    topic: CommandTopic,
    bus: StatusBus,
    link: Link,
    transport: Arc<dyn Transport>,
    speed: Arc<SpeedControl>,
    /// Session behind `/send` and `/stop`.
    manual: Arc<ControlSession>,
    active: Option<SessionHandle>,
    background: Vec<JoinHandle<()>>,
}

impl Panel {
    /// Build the panel and start connecting. Must be called with `runtime`
    /// entered.
    pub fn start(runtime: Handle, config: Config, dry_run: bool) -> Self {
        let bus = StatusBus::default();
        let topic = config.topic();

        let link = if dry_run {
            info!("dry run: commands go to the loopback transport");
            Link::Loopback(Arc::new(LoopbackTransport::new().with_status_bus(bus.clone())))
        } else {
            let (transport, driver) = MqttTransport::connect(&config.broker.to_broker_config(), bus.clone());
            let (shutdown, shutdown_rx) = watch::channel(false);
            let driver = runtime.spawn(driver.run(shutdown_rx));
            Link::Mqtt {
                transport,
                shutdown,
                driver,
            }
        };
        let transport = link.transport();

        let speed = Arc::new(SpeedControl::new(
            config.default_speed,
            topic.clone(),
            transport.clone(),
            bus.clone(),
        ));
        let background = vec![
            speed.spawn_resend_on_connect(),
            crate::status::spawn_printer(bus.subscribe()),
        ];

        let manual = Arc::new(ControlSession::new(
            Modality::Keyboard,
            config.policy(Modality::Keyboard),
            topic.clone(),
            transport.clone(),
            speed.clone(),
            bus.clone(),
        ));

        Self {
            runtime,
            config,
            topic,
            bus,
            link,
            transport,
            speed,
            manual,
            active: None,
            background,
        }
    }

    pub fn topic(&self) -> &CommandTopic {
        &self.topic
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn speed(&self) -> Speed {
        self.speed.current()
    }

    pub fn manual_state(&self) -> DebounceState {
        self.manual.state()
    }

    /// Modality of the running background session, if any.
    pub fn active_modality(&self) -> Option<Modality> {
        self.active
            .as_ref()
            .filter(|h| !h.is_finished())
            .map(SessionHandle::modality)
    }

    /// Transport and topic for the Ctrl-C handler.
    pub fn emergency_stop_handle(&self) -> (Arc<dyn Transport>, CommandTopic) {
        (self.transport.clone(), self.topic.clone())
    }

    /// Take over the terminal until the operator leaves drive mode.
    pub fn drive(&mut self) -> Result<SessionSummary, RcError> {
        self.stop_active();
        let session = self.new_session(Modality::Keyboard);
        let mut keyboard = TerminalKeyboard::enter()?;
        if !keyboard.reports_releases() {
            println!("  (terminal does not report key releases; a key counts as released once it stops repeating)\r");
        }
        let (_stop, stop_rx) = watch::channel(false);
        Ok(self.runtime.block_on(session.run(&mut keyboard, stop_rx)))
    }

    /// Load a classifier for `modality` and run it in the background.
    pub fn start_classifier(&mut self, modality: Modality, replay: Option<PathBuf>) -> Result<(), RcError> {
        let section = self
            .config
            .section(modality)
            .ok_or_else(|| RcError::ClassifierLoad(format!("{modality} is not a classifier modality")))?
            .clone();
        let path = replay.or(section.replay.clone()).ok_or_else(|| {
            RcError::ClassifierLoad(format!("no replay file configured for {modality}"))
        })?;

        self.stop_active();
        let classifier = ReplayClassifier::new(&path, section.frame_interval()).looping(section.looping);
        let source = self
            .runtime
            .block_on(ClassifierSource::start(classifier, modality, self.bus.clone()))?;

        let session = self.new_session(modality);
        let _enter = self.runtime.enter();
        self.active = Some(SessionHandle::spawn(session, Box::new(source)));
        info!(%modality, path = %path.display(), "session started");
        Ok(())
    }

    /// Stop the background session, if one is running. The vehicle is not
    /// told to stop; use [`Panel::stop_vehicle`] for that.
    pub fn stop_active(&mut self) -> Option<SessionSummary> {
        let handle = self.active.take()?;
        Some(self.runtime.block_on(handle.stop()))
    }

    /// Stop any session and send STOP.
    pub fn stop_vehicle(&mut self) -> Decision {
        self.stop_active();
        self.manual.stop_vehicle()
    }

    /// Send a command token as if a button had been pressed. Any running
    /// session is stopped first so that only one source drives the vehicle.
    pub fn send(&mut self, label: &str) -> Option<Decision> {
        self.stop_active();
        self.manual
            .dispatch(Intent::Sample(IntentSample::new(label, 1.0, Instant::now())))
    }

    pub fn set_speed(&self, speed: Speed) -> Result<bool, RcError> {
        self.speed.set(speed)
    }

    fn new_session(&self, modality: Modality) -> Arc<ControlSession> {
        Arc::new(ControlSession::new(
            modality,
            self.config.policy(modality),
            self.topic.clone(),
            self.transport.clone(),
            self.speed.clone(),
            self.bus.clone(),
        ))
    }

    /// Stop everything, send a final STOP and close the link.
    pub fn shutdown(mut self) {
        if let Decision::Suppressed(reason) = self.stop_vehicle() {
            warn!(?reason, "final STOP not transmitted");
        }
        for task in self.background.drain(..) {
            task.abort();
        }
        if let Link::Mqtt {
            transport,
            shutdown,
            driver,
        } = self.link
        {
            transport.disconnect();
            let _ = shutdown.send(true);
            let joined = self
                .runtime
                .block_on(async { tokio::time::timeout(std::time::Duration::from_secs(2), driver).await });
            if joined.is_err() {
                warn!("MQTT driver did not stop in time");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcpanel_types::Command;
    use std::io::Write;

    fn dry_panel(config: Config) -> (tokio::runtime::Runtime, Panel) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime");
        let panel = {
            let _enter = runtime.enter();
            Panel::start(runtime.handle().clone(), config, true)
        };
        (runtime, panel)
    }

    fn loopback(panel: &Panel) -> Arc<LoopbackTransport> {
        match panel.link() {
            Link::Loopback(link) => link.clone(),
            Link::Mqtt { .. } => panic!("expected loopback link"),
        }
    }

    #[test]
    fn send_goes_through_the_debouncer() {
        let (_rt, mut panel) = dry_panel(Config::default());
        assert_eq!(panel.send("forward").and_then(|d| d.command()), Some(Command::Forward));
        assert!(!panel.send("F").expect("decision").is_transmitted());
        assert_eq!(panel.send("S").and_then(|d| d.command()), Some(Command::Stop));
        assert_eq!(loopback(&panel).payloads(), ["F", "S"]);
        assert_eq!(panel.manual_state().last_command(), Some(Command::Stop));
    }

    #[test]
    fn stop_vehicle_always_sends_stop() {
        let (_rt, mut panel) = dry_panel(Config::default());
        panel.send("S");
        assert!(panel.stop_vehicle().is_transmitted());
        assert_eq!(loopback(&panel).payloads(), ["S", "S"]);
    }

    #[test]
    fn speed_is_published_on_the_device_topic() -> Result<(), Box<dyn std::error::Error>> {
        let mut config = Config::default();
        config.device_id = "car_7".into();
        let (_rt, panel) = dry_panel(config);
        assert!(panel.set_speed(Speed::new(45)?)?);
        let sent = loopback(&panel).published();
        assert_eq!(sent[0].topic, "rc/car_7/cmd");
        assert_eq!(sent[0].payload, "speed:45");
        assert_eq!(panel.speed().percent(), 45);
        Ok(())
    }

    #[test]
    fn classifier_without_replay_file_is_an_error() {
        let (_rt, mut panel) = dry_panel(Config::default());
        assert!(matches!(
            panel.start_classifier(Modality::Audio, None),
            Err(RcError::ClassifierLoad(_))
        ));
        assert!(matches!(
            panel.start_classifier(Modality::Keyboard, None),
            Err(RcError::ClassifierLoad(_))
        ));
        assert!(panel.active_modality().is_none());
    }

    #[test]
    fn replayed_gestures_drive_the_vehicle() {
        let mut file = tempfile::NamedTempFile::new().expect("tmp file");
        writeln!(file, r#"[{{"label":"F","probability":0.95}}]"#).expect("write");
        writeln!(file, r#"[{{"label":"F","probability":0.97}}]"#).expect("write");
        writeln!(file, r#"[{{"className":"L","probability":0.80}}]"#).expect("write");

        let mut config = Config::default();
        config.image.frame_rate = 200.0;
        let (rt, mut panel) = dry_panel(config);
        panel
            .start_classifier(Modality::Image, Some(file.path().to_path_buf()))
            .expect("start");

        let link = loopback(&panel);
        rt.block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(2), async {
                while link.payloads().len() < 2 {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
            })
            .await
        })
        .expect("commands in time");
        assert_eq!(link.payloads(), ["F", "L"]);

        panel.stop_active();
        assert!(panel.active_modality().is_none());
    }

    #[test]
    fn send_takes_over_from_a_running_session() {
        let mut file = tempfile::NamedTempFile::new().expect("tmp file");
        writeln!(file, r#"[{{"label":"F","probability":0.95}}]"#).expect("write");

        let mut config = Config::default();
        config.pose.looping = true;
        config.pose.frame_rate = 200.0;
        let (rt, mut panel) = dry_panel(config);
        panel
            .start_classifier(Modality::Pose, Some(file.path().to_path_buf()))
            .expect("start");
        assert_eq!(panel.active_modality(), Some(Modality::Pose));

        let link = loopback(&panel);
        rt.block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(2), async {
                while link.payloads().is_empty() {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
            })
            .await
        })
        .expect("first command in time");

        assert_eq!(panel.send("L").and_then(|d| d.command()), Some(Command::Left));
        assert!(panel.active_modality().is_none());
        let sent = link.payloads().len();
        rt.block_on(async { tokio::time::sleep(std::time::Duration::from_millis(50)).await });
        assert_eq!(link.payloads().len(), sent);
        assert_eq!(link.payloads().last().map(String::as_str), Some("L"));
    }

    #[test]
    fn shutdown_sends_final_stop() {
        let (_rt, panel) = dry_panel(Config::default());
        let link = loopback(&panel);
        panel.shutdown();
        assert_eq!(link.payloads(), ["S"]);
    }
}
