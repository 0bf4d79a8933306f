//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{
    reconcile, ConfigVersion, IncompatibleConfigurationHandling, Reconciliation,
};
use crate::error::Result;
use crate::settings::ShimSettings;
use crate::store::file::read_document;
use crate::store::ConfigDocument;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

/// 查看文档命令
pub struct InspectCommand;

#[async_trait]
impl Command for InspectCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Inspect { file, format } = &args.command {
            let document = load_document(file).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&document)?),
                OutputFormat::Text => print!("{}", render_document(file, &document)),
            }
        }
        Ok(())
    }
}

/// 版本协调检查命令
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Check {
            file,
            expect,
            policy,
            format,
        } = &args.command
        {
            let expected: ConfigVersion = expect.parse()?;
            let document = load_document(file).await?;
            let report = check_document(file, &document, expected, (*policy).into());

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print!("{}", report.render()),
            }
        }
        Ok(())
    }
}

/// 显示设置命令
pub struct SettingsCommand {
    settings: ShimSettings,
}

impl SettingsCommand {
    pub fn new(settings: ShimSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Command for SettingsCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Settings { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&self.settings)?)
                }
                OutputFormat::Text => {
                    let settings = &self.settings;
                    println!("配置目录: {}", settings.resolved_config_dir().display());
                    println!("文档格式: {:?}", settings.document_format);
                    match settings.save_debounce() {
                        Some(delay) => println!("保存防抖: {}ms", delay.as_millis()),
                        None => println!("保存防抖: 关闭"),
                    }
                    println!("日志级别: {}", settings.logging.level);
                    println!("JSON日志: {}", settings.logging.json);
                    if let Some(file) = &settings.logging.file {
                        println!("日志文件: {}", file.display());
                    }
                }
            }
        }
        Ok(())
    }
}

/// 版本协调检查结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckReport {
    pub file: PathBuf,
    pub serialized: ConfigVersion,
    pub defined: ConfigVersion,
    pub policy: IncompatibleConfigurationHandling,
    /// `compatible`、`reject`、`clobber` 或 `force-load`
    pub outcome: String,
    /// 加载后是否能保存
    pub saves_allowed: bool,
    /// 会被读入的键
    pub surviving_keys: Vec<String>,
}

impl CheckReport {
    /// 文本形式
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("文件: {}\n", self.file.display()));
        out.push_str(&format!(
            "文件版本: {}  定义版本: {}  策略: {}\n",
            self.serialized, self.defined, self.policy
        ));
        out.push_str(&format!("结果: {}\n", self.outcome));
        out.push_str(&format!(
            "允许保存: {}\n",
            if self.saves_allowed { "是" } else { "否" }
        ));
        if self.surviving_keys.is_empty() {
            out.push_str("保留的值: 无\n");
        } else {
            out.push_str(&format!("保留的值: {}\n", self.surviving_keys.join(", ")));
        }
        out
    }
}

/// 计算文档在给定定义版本和策略下的协调结果
pub fn check_document(
    file: &Path,
    document: &ConfigDocument,
    defined: ConfigVersion,
    policy: IncompatibleConfigurationHandling,
) -> CheckReport {
    let decision = reconcile(&document.version, &defined, &policy);
    let outcome = match decision {
        Reconciliation::Compatible => "compatible",
        Reconciliation::Reject => "reject",
        Reconciliation::Clobber => "clobber",
        Reconciliation::ForceLoad => "force-load",
    };

    let surviving_keys = if decision.reads_document() {
        document.values.keys().cloned().collect()
    } else {
        Vec::new()
    };

    CheckReport {
        file: file.to_path_buf(),
        serialized: document.version,
        defined,
        policy,
        outcome: outcome.to_string(),
        saves_allowed: decision != Reconciliation::Reject,
        surviving_keys,
    }
}

/// 文档的文本形式
pub fn render_document(file: &Path, document: &ConfigDocument) -> String {
    let mut out = String::new();
    out.push_str(&format!("文件: {}\n", file.display()));
    out.push_str(&format!("版本: {}\n", document.version));
    if let Some(saved_at) = document.saved_at {
        out.push_str(&format!(
            "保存时间: {}\n",
            saved_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    out.push_str(&format!("值 ({}):\n", document.values.len()));
    for (name, value) in &document.values {
        out.push_str(&format!("  {} = {}\n", name, value));
    }
    out
}

async fn load_document(file: &Path) -> Result<ConfigDocument> {
    let path = file.to_path_buf();
    let document = tokio::task::spawn_blocking(move || read_document(&path))
        .await
        .map_err(anyhow::Error::from)??;
    Ok(document)
}
