use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lexibridge::capture::screen::ScreenCapture;
use lexibridge::capture::AutoCaptureStats;
use lexibridge::config::AppConfig;
use lexibridge::speech::VoiceType;
use lexibridge::translate::LANGUAGES;
use lexibridge::Assistant;

const HELP: &str = "\
commands:
  <text>              translate text
  :import <path>      merge a JSON or SQLite glossary
  :ocr <image>        recognize and translate an image file
  :speak <text>       synthesize speech to speech.mp3
  :capture            start/stop screen auto-capture
  :history [n]        show recent translations
  :forget <id>        delete a history entry
  :langs              supported languages
  :metrics            latency summary
  :quit";

#[tokio::main]
async fn main() {
    lexibridge::init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };
    let assistant = match Assistant::start(config) {
        Ok(assistant) => assistant,
        Err(e) => {
            error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    if let Some(path) = assistant.config().glossary_path.clone() {
        match assistant.import_glossary(&path) {
            Ok(count) => info!(path = %path.display(), count, "startup glossary queued"),
            Err(e) => warn!(path = %path.display(), error = %e, "startup glossary rejected"),
        }
    }

    info!("lexibridge ready");
    println!("{HELP}");

    let mut capture: Option<(CancellationToken, JoinHandle<AutoCaptureStats>)> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();

        match command {
            "" => {}
            ":quit" | ":q" => break,
            ":help" => println!("{HELP}"),
            ":import" => match assistant.import_glossary(Path::new(arg)) {
                Ok(count) => println!("imported {count} entries"),
                Err(e) => println!("import rejected: {e}"),
            },
            ":ocr" => match tokio::fs::read(arg).await {
                Ok(bytes) => {
                    let upload = base64_upload(&bytes);
                    let config = assistant.config();
                    match assistant
                        .translate_upload(&upload, &config.source_lang, &config.target_lang)
                        .await
                    {
                        Ok(out) => {
                            println!("{}", out.text);
                            if let Some(t) = out.translation {
                                println!("=> {}", t.translated_text);
                            }
                        }
                        Err(e) => println!("error: {e}"),
                    }
                }
                Err(e) => println!("cannot read {arg}: {e}"),
            },
            ":speak" => match assistant.speak(arg, VoiceType::default()).await {
                Ok(audio) => match tokio::fs::write("speech.mp3", &audio).await {
                    Ok(()) => println!("wrote speech.mp3 ({} bytes)", audio.len()),
                    Err(e) => println!("cannot write audio: {e}"),
                },
                Err(e) => println!("error: {e}"),
            },
            ":capture" => match capture.take() {
                Some((cancel, task)) => {
                    cancel.cancel();
                    if let Ok(stats) = task.await {
                        println!(
                            "auto-capture stopped: {} cycles, {} translated",
                            stats.cycles, stats.translated
                        );
                    }
                }
                None => {
                    let screen = ScreenCapture::new();
                    if !screen.is_available() {
                        println!("no screen capture tool found (grim, maim, scrot)");
                        continue;
                    }
                    let cancel = CancellationToken::new();
                    let task = assistant.start_auto_capture(Arc::new(screen), cancel.clone());
                    let mut display = assistant.translator().display().subscribe();
                    tokio::spawn(async move {
                        while display.changed().await.is_ok() {
                            let latest = display.borrow_and_update().clone();
                            if let Some(text) = latest {
                                println!("[live] {text}");
                            }
                        }
                    });
                    capture = Some((cancel, task));
                    println!("auto-capture started");
                }
            },
            ":history" => {
                let limit = arg.parse().unwrap_or(10);
                match assistant.history() {
                    Some(store) => {
                        store.flush().await;
                        for entry in store.query_recent(&assistant.config().user_id, limit) {
                            println!(
                                "#{} [{}] {} => {}",
                                entry.id,
                                entry.record.method,
                                entry.record.source_text,
                                entry.record.translated_text
                            );
                        }
                    }
                    None => println!("history disabled"),
                }
            }
            ":forget" => match (assistant.history(), arg.parse::<i64>()) {
                (None, _) => println!("history disabled"),
                (Some(_), Err(_)) => println!("usage: :forget <id>"),
                (Some(store), Ok(id)) => match store.delete(&assistant.config().user_id, id) {
                    Ok(true) => println!("deleted #{id}"),
                    Ok(false) => println!("no entry #{id}"),
                    Err(e) => println!("error: {e}"),
                },
            },
            ":langs" => {
                for (code, name) in LANGUAGES {
                    println!("{code:<4} {name}");
                }
            }
            ":metrics" => {
                for (name, m) in assistant.metrics_summary() {
                    println!(
                        "{name:<22} n={:<6} p50={:.0}us p95={:.0}us p99={:.0}us",
                        m.count, m.p50_us, m.p95_us, m.p99_us
                    );
                }
            }
            other if other.starts_with(':') => println!("unknown command {other}, try :help"),
            _ => {
                let config = assistant.config();
                match assistant
                    .translate(line, &config.source_lang, &config.target_lang)
                    .await
                {
                    Ok(Some(t)) => println!("=> {} ({})", t.translated_text, t.origin.method_label()),
                    Ok(None) => {}
                    Err(e) => println!("error: {e}"),
                }
            }
        }
    }

    if let Some((cancel, task)) = capture {
        cancel.cancel();
        let _ = task.await;
    }
    if let Some(store) = assistant.history() {
        store.flush().await;
    }
    info!("lexibridge exiting");
}

fn base64_upload(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
