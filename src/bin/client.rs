//! Command-line test client for the multipart upload endpoints

use argh::FromArgs;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_SERVER: &str = "http://localhost:5000";
const DEFAULT_QUESTION: &str = "What's in this image?";

#[derive(FromArgs)]
/// Upload an image to the vision-language server and print the result
struct ClientArgs {
    /// the image to upload
    #[argh(positional)]
    image: PathBuf,

    /// question to ask about the image
    #[argh(option, short = 'q', default = "DEFAULT_QUESTION.to_string()")]
    question: String,

    /// request a caption instead of an answer
    #[argh(switch, short = 'c')]
    caption: bool,

    /// caption length: short, normal or long
    #[argh(option, short = 'l', default = "String::from(\"normal\")")]
    length: String,

    /// server base URL
    #[argh(option, short = 's', default = "DEFAULT_SERVER.to_string()")]
    server: String,

    /// value for the X-Moondream-Auth header
    #[argh(option, short = 'k')]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: ClientArgs = argh::from_env();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ClientArgs) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.image)
        .await
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", args.image.display(), e))?;
    let file_name = args
        .image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let (endpoint, form) = if args.caption {
        println!("Uploading {} for a {} caption...", args.image.display(), args.length);
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("length", args.length.clone());
        ("caption", form)
    } else {
        println!("Uploading {}...", args.image.display());
        println!("Question: {}\n", args.question);
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("question", args.question.clone());
        ("identify", form)
    };

    let url = format!("{}/{}", args.server.trim_end_matches('/'), endpoint);
    let mut request = reqwest::Client::new().post(&url).multipart(form);
    if let Some(key) = &args.api_key {
        request = request.header(vlm_serving::middleware::AUTH_HEADER, key);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_connect() {
            anyhow::anyhow!("cannot connect to {}. Is the server running?", args.server)
        } else {
            e.into()
        }
    })?;

    let status = response.status();
    let text = response.text().await?;
    let body = parse_response(status, &text)?;

    println!("✓ Success!");
    if args.caption {
        println!("Caption: {}", body["caption"].as_str().unwrap_or_default());
    } else {
        println!("Answer: {}", body["answer"].as_str().unwrap_or_default());
    }
    println!("Inference Time: {}", body["inference_time"].as_str().unwrap_or_default());

    Ok(())
}

/// Error bodies are reported verbatim; they need not be JSON.
fn parse_response(status: StatusCode, text: &str) -> anyhow::Result<serde_json::Value> {
    if !status.is_success() {
        anyhow::bail!("{} {}", status, text);
    }
    serde_json::from_str(text).map_err(|e| anyhow::anyhow!("unexpected response body ({}): {}", e, text))
}
