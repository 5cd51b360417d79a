use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use termai_core_sdk::{
    db,
    models::{autofill_api_url, FormatType, ProviderProfile},
    registry::{validate_profile, ProviderRegistry, SqliteStore},
    settings::SettingsService,
    telemetry,
};

/**
 * \brief CLI 程序入口：AI Provider 与终端 AI 设置的管理界面。
 */
#[derive(Parser, Debug)]
#[command(name = "termai", version, about = "Terminal AI provider settings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 首次运行初始化：建表并播种默认的 DeepSeek Provider。
     */
    Init {
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /**
     * \brief Provider 档案管理。
     */
    #[command(subcommand)]
    Provider(ProviderCmd),

    /**
     * \brief 用户偏好设置。
     */
    #[command(subcommand)]
    Settings(SettingsCmd),
}

#[derive(Subcommand, Debug)]
enum ProviderCmd {
    /**
     * \brief 新增 Provider。
     * \param url 留空或仍为公开默认地址时，按格式类型自动填充。
     */
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "openai")]
        format: String,
        #[arg(long, default_value = "")]
        url: String,
        #[arg(long, default_value = "")]
        key: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value_t = false)]
        set_default: bool,
    },

    /**
     * \brief 编辑既有 Provider，未给出的字段保持原值。
     */
    Edit {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },

    /** \brief 列出全部 Provider。 */
    List,

    /** \brief 将指定 Provider 设为默认。 */
    SetDefault {
        #[arg(long)]
        id: i64,
    },

    /** \brief 删除指定 Provider（最后一个不允许删除）。 */
    Remove {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
    /** \brief 显示当前全部偏好。 */
    Show,

    /** \brief 更新旧版全局 API Key。 */
    SetKey { key: String },

    /** \brief 更新自定义系统提示词。 */
    SetPrompt { prompt: String },

    /** \brief 更新命令关键字列表（全角逗号自动归一化）。 */
    SetCommandLink { value: String },

    /** \brief 切换 AI 回复在终端中的可见性。 */
    AiVisible {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /** \brief 切换遥测开关。 */
    Telemetry {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Init { enable_telemetry } => {
            let prefs = db::get_user_preferences(&conn).context("load preferences failed")?;
            match db::seed_default_provider(&conn, &prefs.llm_api_key)
                .context("seed default provider failed")?
            {
                Some(id) => println!("Seeded default provider DeepSeek (id={})", id),
                None => println!("Providers already configured, nothing to seed"),
            }
            db::set_telemetry_enabled(&conn, enable_telemetry)
                .context("save telemetry flag failed")?;
            telemetry::set_enabled(enable_telemetry);
            println!("Initialized (telemetry={})", enable_telemetry);
        }
        Commands::Provider(cmd) => run_provider(conn, cmd)?,
        Commands::Settings(cmd) => run_settings(&conn, cmd)?,
    }

    Ok(())
}

fn run_provider(conn: rusqlite::Connection, cmd: ProviderCmd) -> Result<()> {
    let registry = ProviderRegistry::new(SqliteStore::new(conn));

    match cmd {
        ProviderCmd::Add {
            name,
            format,
            mut url,
            key,
            model,
            set_default,
        } => {
            let format = FormatType::parse(&format);
            if let Some(filled) = autofill_api_url(format, &url) {
                url = filled.to_string();
            }
            let profile = ProviderProfile::unsaved(name, format, url, key, model);
            validate_profile(&profile)?;

            let id = registry
                .insert_provider(&profile)
                .context("save provider failed")?;
            if set_default {
                registry
                    .set_default_provider(id)
                    .context("set default failed")?;
            }
            telemetry::log_event(
                "cli.provider",
                &format!("add id={} format={}", id, format),
            );
            println!(
                "Saved provider id={} ({} | {} | {} | {})",
                id, profile.name, format, profile.api_url, profile.model_name
            );
        }
        ProviderCmd::Edit {
            id,
            name,
            format,
            url,
            key,
            model,
        } => {
            let mut profile = registry
                .get_provider(id)
                .context("load provider failed")?
                .with_context(|| format!("provider id {} not found", id))?;

            if let Some(format) = format {
                profile.format_type = FormatType::parse(&format);
                // 切换格式时仅在 URL 未自定义的情况下跟随默认地址
                if url.is_none() {
                    if let Some(filled) = autofill_api_url(profile.format_type, &profile.api_url) {
                        profile.api_url = filled.to_string();
                    }
                }
            }
            if let Some(name) = name {
                profile.name = name;
            }
            if let Some(url) = url {
                profile.api_url = url;
            }
            if let Some(key) = key {
                profile.api_key = key;
            }
            if let Some(model) = model {
                profile.model_name = model;
            }
            validate_profile(&profile)?;

            registry
                .update_provider(&profile)
                .context("update provider failed")?;
            telemetry::log_event("cli.provider", &format!("edit id={}", id));
            println!("Updated provider id={} ({})", id, profile.name);
        }
        ProviderCmd::List => {
            let providers = registry.list_providers().context("list providers failed")?;
            if providers.is_empty() {
                println!("No providers configured, run: termai init");
            }
            for p in providers {
                let badge = if p.is_default { " (default)" } else { "" };
                println!(
                    "[{}] {}{} | {} | {} | {}",
                    p.id, p.name, badge, p.format_type, p.api_url, p.model_name
                );
            }
        }
        ProviderCmd::SetDefault { id } => {
            registry
                .set_default_provider(id)
                .context("set default failed")?;
            match registry.get_provider(id).context("load provider failed")? {
                Some(p) => println!("Default provider is now {} (id={})", p.name, id),
                None => println!("Provider id {} not found, default unchanged", id),
            }
            telemetry::log_event("cli.provider", &format!("set-default id={}", id));
        }
        ProviderCmd::Remove { id } => {
            if let Err(err) = registry.delete_provider(id) {
                telemetry::log_error("cli.provider", &format!("remove id={} failed: {}", id, err));
                return Err(err).context("delete failed");
            }
            telemetry::log_event("cli.provider", &format!("remove id={}", id));
            println!("Removed provider id={}", id);
            if registry
                .list_providers()
                .context("list providers failed")?
                .iter()
                .all(|p| !p.is_default)
            {
                println!("No default provider set, pick one: termai provider set-default --id <ID>");
            }
        }
    }

    Ok(())
}

fn run_settings(conn: &rusqlite::Connection, cmd: SettingsCmd) -> Result<()> {
    let settings = SettingsService::new(conn);

    match cmd {
        SettingsCmd::Show => {
            let prefs = settings.preferences().context("load preferences failed")?;
            let key_display = if prefs.llm_api_key.is_empty() {
                "(unset)"
            } else {
                "(set)"
            };
            println!("ai_visible_terminal = {}", prefs.ai_visible_terminal);
            println!("llm_api_key         = {}", key_display);
            println!(
                "command_link        = {}",
                settings
                    .effective_command_link()
                    .context("load command link failed")?
            );
            println!(
                "system_prompt       = {}",
                settings
                    .effective_system_prompt()
                    .context("load system prompt failed")?
            );
            println!(
                "telemetry_enabled   = {}",
                db::get_telemetry_enabled(conn).context("load telemetry flag failed")?
            );
        }
        SettingsCmd::SetKey { key } => {
            settings.set_api_key(&key).context("save api key failed")?;
            println!("API key updated");
        }
        SettingsCmd::SetPrompt { prompt } => {
            settings
                .set_system_prompt(&prompt)
                .context("save system prompt failed")?;
            println!("System prompt updated");
        }
        SettingsCmd::SetCommandLink { value } => {
            let normalized = settings
                .set_command_link(&value)
                .context("save command link failed")?;
            println!("Command link updated: {}", normalized);
        }
        SettingsCmd::AiVisible { enabled } => {
            settings
                .set_ai_visible(enabled)
                .context("save visibility failed")?;
            println!("AI visible in terminal: {}", enabled);
        }
        SettingsCmd::Telemetry { enabled } => {
            db::set_telemetry_enabled(conn, enabled).context("save telemetry flag failed")?;
            telemetry::set_enabled(enabled);
            println!("Telemetry enabled: {}", enabled);
        }
    }

    Ok(())
}
