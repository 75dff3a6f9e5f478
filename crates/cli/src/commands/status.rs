//! `tidechat status` — Show configuration and store status.

use tidechat_config::AppConfig;
use tidechat_core::store::ConversationStore;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🌊 Tidechat Status");
    println!("==================\n");

    if config_path.exists() {
        println!("✅ Config: {}", config_path.display());
    } else {
        println!("⚠️  No config file (using defaults). Run `tidechat onboard`.");
    }

    match &config.api_url {
        Some(url) => println!("✅ Model endpoint: {url} ({})", config.model),
        None => println!("⚠️  No api_url configured; generation will be unavailable."),
    }
    println!(
        "   API key: {}",
        if config.has_api_key() { "set" } else { "not set" }
    );
    println!(
        "   Context: {} tokens ({} reserved for replies)",
        config.context.max_tokens, config.context.reply_tokens
    );

    match config.store.backend.as_str() {
        "memory" => println!("   Store: in-memory (conversations are not persisted)"),
        _ => {
            let path = config
                .store
                .path
                .clone()
                .unwrap_or_else(|| AppConfig::default_db_path().display().to_string());
            if std::path::Path::new(&path).exists() {
                let store = tidechat_store::SqliteStore::new(&path).await?;
                let count = store.count().await?;
                println!("✅ Store: {path} ({count} conversations)");
            } else {
                println!("   Store: {path} (not created yet)");
            }
        }
    }

    println!();
    Ok(())
}
