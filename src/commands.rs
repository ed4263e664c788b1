use crate::assist::{AssistClient, DisabledAssist, HttpAssistClient};
use crate::chat;
use crate::config::{BackendKind, Config};
use crate::events::PracticeMode;
use crate::llm::HttpCompletionClient;
use crate::persistence::{ConversationBackend, LocalBackend, RestBackend, SupportingDocuments};
use crate::prompts::DocumentAnalysis;
use crate::session::{ControllerSettings, SessionController, SessionOptions, SessionServices};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use strum::IntoEnumIterator;

/// Everything `rehearse chat` needs besides the config
#[derive(Debug, Clone, Default)]
pub struct ChatArgs {
    pub mode: Option<PracticeMode>,
    pub guest: bool,
    pub title: Option<String>,
    pub job_description: Option<PathBuf>,
    pub resume: Option<PathBuf>,
    pub analysis: Option<PathBuf>,
    pub resume_conversation: Option<String>,
}

/// Wire HTTP clients and the configured backend together
pub fn build_services(config: &Config) -> Result<SessionServices> {
    let completion = Arc::new(HttpCompletionClient::new(config.api.clone())?);

    let assist: Arc<dyn AssistClient> = if config.has_api() && (config.assist.quick_replies || config.assist.feedback) {
        Arc::new(HttpAssistClient::new(config.api.clone())?)
    } else {
        Arc::new(DisabledAssist)
    };

    Ok(SessionServices {
        completion,
        assist,
        backend: build_backend(config)?,
    })
}

pub fn build_backend(config: &Config) -> Result<Option<Arc<dyn ConversationBackend>>> {
    let backend: Option<Arc<dyn ConversationBackend>> = match config.storage.backend {
        BackendKind::None => None,
        BackendKind::Local => Some(Arc::new(LocalBackend::new(config.data_dir()))),
        BackendKind::Rest => {
            let (Some(url), Some(api_key)) = (&config.storage.url, &config.storage.api_key) else {
                bail!("storage.backend = \"rest\" needs storage.url and storage.api_key (or REHEARSE_BACKEND_URL / REHEARSE_BACKEND_KEY)");
            };
            Some(Arc::new(RestBackend::new(
                url.clone(),
                api_key.clone(),
                config.storage.access_token.clone(),
            )?))
        }
    };
    Ok(backend)
}

pub async fn start_chat(config: &Config, args: ChatArgs) -> Result<()> {
    if !config.has_api() {
        println!("⚠️  No completion API configured. Set api.base_url and api.api_key in");
        println!("   {} or export REHEARSE_API_URL / REHEARSE_API_KEY.", config.config_path().display());
        println!();
    }

    let user_id = if args.guest { None } else { config.storage.user_id.clone() };
    let mode = args.mode.unwrap_or(PracticeMode::InterviewPractice);

    let documents = SupportingDocuments {
        job_description: read_optional(args.job_description.as_ref())?,
        resume_text: read_optional(args.resume.as_ref())?,
    };
    let analysis = match &args.analysis {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read analysis file {}", path.display()))?;
            let analysis: DocumentAnalysis = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse analysis file {}", path.display()))?;
            Some(analysis)
        }
        None => None,
    };

    let options = SessionOptions {
        mode,
        user_id,
        title: args.title,
        documents,
        analysis,
    };
    let controller = Arc::new(SessionController::new(
        ControllerSettings::from_config(config),
        options,
        build_services(config)?,
    ));

    let mut prime = mode == PracticeMode::InterviewPractice && config.has_api();
    if let Some(id) = &args.resume_conversation {
        controller
            .load_conversation(id)
            .await
            .with_context(|| format!("Failed to load conversation '{}'", id))?;
        prime = false;
    }

    chat::run(controller, prime).await
}

pub fn list_modes() {
    println!("🎭 Practice modes:");
    println!("{}", "=".repeat(50));
    for mode in PracticeMode::iter() {
        println!("  {:<20} {}", mode.id(), mode.description());
    }
    println!();
    println!("Start one with: rehearse chat --mode <mode>");
}

pub async fn show_history(config: &Config) -> Result<()> {
    let Some(user_id) = config.storage.user_id.as_deref() else {
        println!("👤 Guest sessions are not stored. Set storage.user_id (or REHEARSE_USER_ID) to keep history.");
        return Ok(());
    };
    let Some(backend) = build_backend(config)? else {
        println!("📭 Storage is disabled (storage.backend = \"none\").");
        return Ok(());
    };

    let conversations = backend.list_conversations(user_id).await?;
    if conversations.is_empty() {
        println!("📭 No conversations yet. Run 'rehearse chat' to start practicing!");
        return Ok(());
    }

    println!("📚 Your practice conversations:");
    println!("{}", "=".repeat(50));
    for record in conversations {
        println!("📋 {}", record.title);
        println!("   🆔 {}", record.id);
        println!("   🎯 Mode: {}", record.mode.display_name());
        println!(
            "   💬 {} messages over {}m {}s",
            record.message_count,
            record.duration_secs / 60,
            record.duration_secs % 60
        );
        println!("   🕒 Last activity: {}", record.updated_at.format("%Y-%m-%d %H:%M"));
        println!();
    }
    println!("Continue one with: rehearse chat --resume <id>");

    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if shown.api.api_key.is_some() {
        shown.api.api_key = Some("********".to_string());
    }
    if shown.storage.api_key.is_some() {
        shown.storage.api_key = Some("********".to_string());
    }
    if shown.storage.access_token.is_some() {
        shown.storage.access_token = Some("********".to_string());
    }

    println!("# {}", config.config_path().display());
    println!("{}", toml::to_string_pretty(&shown).context("Failed to serialize config")?);
    Ok(())
}

pub fn init_config(config: &Config, force: bool) -> Result<()> {
    let path = config.config_path();
    if path.exists() && !force {
        println!("✅ Config already exists at {}", path.display());
        println!("   Use --force to overwrite it with defaults.");
        return Ok(());
    }

    let mut fresh = Config::default();
    fresh.rehearse_home = config.rehearse_home.clone();
    fresh.save()?;
    println!("🎉 Wrote default config to {}", path.display());
    Ok(())
}

fn read_optional(path: Option<&PathBuf>) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content = content.trim();
    Ok((!content.is_empty()).then(|| content.to_string()))
}
