use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use neochat::models::{Provider, Theme};
use neochat::{App, NoticeLevel, UiEvent};

fn db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("neochat")
        .join("neochat.sqlite")
}

fn print_event(event: &UiEvent) {
    match event {
        UiEvent::MessageAppended(m) | UiEvent::MessageUpdated(m) => {
            println!("[{:?}] {}: {}", m.status, m.role.as_api_str(), m.text);
        }
        UiEvent::LogCleared => println!("-- history cleared --"),
        UiEvent::StatusChanged(status) => println!("-- status: {status:?} --"),
        UiEvent::Notice { text, level } => match level {
            NoticeLevel::Error => eprintln!("!! {text}"),
            NoticeLevel::Info => println!("-- {text} --"),
        },
        UiEvent::OpenSettings => println!("-- open settings: /set api_key <key> --"),
    }
}

async fn apply_setting(app: &App, key: &str, value: &str) {
    let mut settings = app.controller.settings().await;
    match key {
        "api_key" => settings.api_key = value.to_string(),
        "provider" => settings.provider = Provider::parse(value),
        "base_url" => settings.api_base_url = value.to_string(),
        "model" => settings.model = value.to_string(),
        "system_prompt" => settings.system_prompt = value.to_string(),
        "max_tokens" => match value.parse() {
            Ok(n) => settings.max_tokens = n,
            Err(_) => {
                eprintln!("!! max_tokens must be a number");
                return;
            }
        },
        "temperature" => match value.parse() {
            Ok(t) => settings.temperature = t,
            Err(_) => {
                eprintln!("!! temperature must be a number");
                return;
            }
        },
        "theme" => {
            settings.theme = if value.eq_ignore_ascii_case("light") {
                Theme::Light
            } else {
                Theme::Dark
            }
        }
        _ => {
            eprintln!("!! unknown setting: {key}");
            return;
        }
    }
    app.controller.save_settings(settings).await;
}

async fn show_settings(app: &App) {
    let s = app.controller.settings().await;
    let key_display = if s.api_key.is_empty() {
        "(not set)".to_string()
    } else {
        format!("{}…", &s.api_key[..s.api_key.len().min(6)])
    };
    println!("provider      {}", s.provider.as_str());
    println!("base_url      {}", s.api_base_url);
    println!("model         {}", s.model);
    println!("api_key       {key_display}");
    println!("max_tokens    {}", s.max_tokens);
    println!("temperature   {}", s.temperature);
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let (app, mut events) = App::open(&db_path()).await?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    println!("neochat — /settings /set <key> <value> /test /clear /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let line = line.trim();
        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["/quit"] | ["/exit"] => break,
            ["/settings"] => show_settings(&app).await,
            ["/set", key, rest @ ..] if !rest.is_empty() => {
                apply_setting(&app, key, &rest.join(" ")).await;
            }
            ["/test"] => {
                app.controller.test_connection().await;
            }
            ["/clear"] => app.controller.clear_history().await,
            [] => {}
            _ if line.starts_with('/') => eprintln!("!! unknown command: {line}"),
            _ => {
                app.controller.send(line).await;
            }
        }
    }

    Ok(())
}
