//! 插件宿主集成测试：文件存储、启用开关、生命周期和防抖写入

use modshim::config::{
    AnnotatedField, ConfigKeyDefinition, ConfigVersion, ConfigurationDefinitionBuilder,
    IncompatibleConfigurationHandling, LoadState, TypedConfigKey,
};
use modshim::host::{LegacyMod, ModHost, ShimHost, ShutdownEvent};
use modshim::settings::ShimSettings;
use modshim::store::{DocumentFormat, FileDocumentStore};
use parking_lot::Mutex;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct Greeter {
    enabled: TypedConfigKey<bool>,
    volume: TypedConfigKey<u8>,
    greeting: TypedConfigKey<String>,
    version: ConfigVersion,
    policy: IncompatibleConfigurationHandling,
    init_calls: AtomicUsize,
}

impl Greeter {
    fn new(version: ConfigVersion, policy: IncompatibleConfigurationHandling) -> Arc<Self> {
        Arc::new(Self {
            enabled: ConfigKeyDefinition::new("enabled")
                .with_default_value(true)
                .into_key(),
            volume: ConfigKeyDefinition::new("volume")
                .with_default_value(5)
                .into_key(),
            greeting: ConfigKeyDefinition::new("greeting")
                .with_default(|| "hello".to_string())
                .with_validator(|text: &String| !text.is_empty())
                .into_key(),
            version,
            policy,
            init_calls: AtomicUsize::new(0),
        })
    }
}

impl LegacyMod for Greeter {
    fn name(&self) -> &str {
        "Greeter"
    }

    fn author(&self) -> &str {
        "someone"
    }

    fn version(&self) -> &str {
        "2.3.1"
    }

    fn link(&self) -> Option<&str> {
        Some("https://example.invalid/greeter")
    }

    fn annotated_fields(&self) -> Vec<AnnotatedField> {
        vec![
            AnnotatedField::key("volume", &self.volume).with_range(0.0, 10.0),
            AnnotatedField::incompatible("timer", "std::time::Duration"),
        ]
    }

    fn define_configuration(&self, builder: &mut ConfigurationDefinitionBuilder) {
        builder
            .key(&self.enabled)
            .key(&self.greeting)
            .version(self.version);
    }

    fn handle_incompatible_configuration_versions(
        &self,
        _serialized: &ConfigVersion,
        _defined: &ConfigVersion,
    ) -> IncompatibleConfigurationHandling {
        self.policy
    }

    fn on_engine_init(&self, host: &ModHost) -> anyhow::Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let configuration = host
            .configuration()
            .ok_or_else(|| anyhow::anyhow!("configuration missing"))?;
        anyhow::ensure!(configuration.is_key_defined("volume"));
        Ok(())
    }
}

fn file_store(dir: &Path) -> Arc<FileDocumentStore> {
    Arc::new(FileDocumentStore::new(dir, DocumentFormat::Json))
}

fn read_json(path: &Path) -> serde_json::Value {
    let content = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[test]
fn test_values_persist_across_hosts() {
    let dir = TempDir::new().unwrap();
    let version = ConfigVersion::new(1, 0, 0);

    {
        let plugin = Greeter::new(version, IncompatibleConfigurationHandling::Error);
        let host = ModHost::new(plugin.clone(), file_store(dir.path()));
        assert_eq!(host.full_id(), "legacy.Greeter");
        assert_eq!(host.link(), Some("https://example.invalid/greeter"));

        assert!(host.run().unwrap());
        assert_eq!(plugin.init_calls.load(Ordering::SeqCst), 1);

        let configuration = host.configuration().unwrap();
        assert_eq!(configuration.load_state(), LoadState::Loaded);
        assert!(!configuration.is_key_defined("timer"));
        assert!(!configuration.is_key_defined("enabled"));

        assert!(plugin.volume.set_value(11, None).is_err());
        plugin.volume.set_value(9, None).unwrap();
        plugin
            .greeting
            .set_value("bonjour".to_string(), Some("test"))
            .unwrap();
        assert!(plugin.greeting.set_value(String::new(), None).is_err());

        host.set_enabled(false).unwrap();
        assert!(host.shutdown(false).unwrap());
    }

    let config_file = dir.path().join("legacy.Greeter").join("config.json");
    let document = read_json(&config_file);
    assert_eq!(document["version"], json!("1.0.0"));
    assert_eq!(document["values"]["volume"], json!(9));
    assert_eq!(document["values"]["greeting"], json!("bonjour"));

    let toggles = read_json(&dir.path().join("legacy.Greeter").join("toggles.json"));
    assert_eq!(toggles["values"]["enabled"], json!(false));

    let plugin = Greeter::new(version, IncompatibleConfigurationHandling::Error);
    let host = ModHost::new(plugin.clone(), file_store(dir.path()));
    assert!(!host.is_enabled());
    assert_eq!(plugin.volume.get_value(), 9);
    assert_eq!(plugin.greeting.get_value(), "bonjour");
}

#[test]
fn test_plugin_policy_decides_version_mismatch() {
    let dir = TempDir::new().unwrap();

    {
        let plugin = Greeter::new(ConfigVersion::new(1, 0, 0), IncompatibleConfigurationHandling::Error);
        let host = ModHost::new(plugin.clone(), file_store(dir.path()));
        host.configuration().unwrap();
        plugin.volume.set_value(2, None).unwrap();
    }

    // 新版本插件选择强制加载
    let forced = Greeter::new(ConfigVersion::new(2, 0, 0), IncompatibleConfigurationHandling::ForceLoad);
    let host = ModHost::new(forced.clone(), file_store(dir.path()));
    assert_eq!(forced.volume.get_value(), 2);
    assert_eq!(
        host.configuration().unwrap().persisted_version(),
        Some(ConfigVersion::new(1, 0, 0))
    );
    drop(host);
    drop(forced);

    // 另一个新版本插件坚持报错：配置不可用但插件照常运行
    let strict = Greeter::new(ConfigVersion::new(3, 0, 0), IncompatibleConfigurationHandling::Error);
    let host = ModHost::new(strict.clone(), file_store(dir.path()));
    let configuration = host.configuration().unwrap();
    assert!(configuration.load_state().is_failed());
    assert_eq!(strict.volume.get_value(), 5);
    assert!(strict.volume.set_value(3, None).is_err());
    assert!(host.run().unwrap());
    assert!(host.shutdown(true).unwrap());
}

#[test]
fn test_shutdown_subscribers_see_exit_flag() {
    let dir = TempDir::new().unwrap();
    let plugin = Greeter::new(ConfigVersion::default(), IncompatibleConfigurationHandling::Error);
    let host = ModHost::new(plugin, file_store(dir.path()));

    let events: Arc<Mutex<Vec<(String, ShutdownEvent)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    host.on_shutdown_done(move |event| {
        sink.lock().push(("done".to_string(), event.clone()));
        Ok(())
    });
    let sink = Arc::clone(&events);
    host.on_shutting_down(move |event| {
        sink.lock().push(("shutting".to_string(), event.clone()));
        Ok(())
    });

    assert!(host.shutdown(true).unwrap());
    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "shutting");
    assert_eq!(events[1].0, "done");
    assert!(events[1].1.application_exiting);
    assert_eq!(events[1].1.plugin, "Greeter");
}

#[tokio::test]
async fn test_shim_host_flushes_debounced_writes_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let settings = ShimSettings {
        config_dir: Some(dir.path().to_path_buf()),
        save_debounce_ms: 10_000,
        ..Default::default()
    };

    let mut shim = ShimHost::from_settings(settings).unwrap();
    let plugin = Greeter::new(ConfigVersion::default(), IncompatibleConfigurationHandling::Error);
    shim.register(plugin.clone()).unwrap();
    assert!(shim.register(plugin.clone()).is_err());
    assert_eq!(shim.run_all(), 1);

    for volume in 1..=4 {
        plugin.volume.set_value(volume, None).unwrap();
    }

    let config_file = dir.path().join("legacy.Greeter").join("config.json");
    assert!(!config_file.exists());
    assert_eq!(shim.pending_writes(), 1);

    assert!(shim.shutdown_all(true));
    assert_eq!(shim.pending_writes(), 0);
    assert_eq!(read_json(&config_file)["values"]["volume"], json!(4));
}

#[tokio::test]
async fn test_shim_host_debounce_timer_writes_last_value() {
    let dir = TempDir::new().unwrap();
    let settings = ShimSettings {
        config_dir: Some(dir.path().to_path_buf()),
        document_format: DocumentFormat::Toml,
        save_debounce_ms: 20,
        ..Default::default()
    };

    let mut shim = ShimHost::from_settings(settings).unwrap();
    let plugin = Greeter::new(ConfigVersion::default(), IncompatibleConfigurationHandling::Error);
    let host = shim.register(plugin.clone()).unwrap();
    host.configuration().unwrap();

    plugin.greeting.set_value("one".to_string(), None).unwrap();
    plugin.greeting.set_value("two".to_string(), None).unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let config_file = dir.path().join("legacy.Greeter").join("config.toml");
    let content = std::fs::read_to_string(&config_file).unwrap();
    assert!(content.contains("greeting = \"two\""));
    assert_eq!(shim.pending_writes(), 0);
}
