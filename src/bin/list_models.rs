//! List the Gemini models your API key can use for text generation.
//!
//! Usage: cargo run --bin list_models
//!
//! Reads GEMINI_API_KEY from the environment (or .env). Handy for picking the
//! `models` fallback list in nightcoach.json.

use serde::Deserialize;

const MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<Model>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Model {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let Ok(api_key) = std::env::var("GEMINI_API_KEY") else {
        eprintln!("GEMINI_API_KEY is not set");
        std::process::exit(1);
    };

    let client = reqwest::Client::new();
    let mut page_token: Option<String> = None;

    println!("--- Models available to your key ---");

    loop {
        let mut query = vec![("key", api_key.clone()), ("pageSize", "100".to_string())];
        if let Some(ref token) = page_token {
            query.push(("pageToken", token.clone()));
        }

        let response = match client.get(MODELS_URL).query(&query).send().await {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Request failed: {}", e.without_url());
                std::process::exit(1);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            eprintln!("API error {status}: {body}");
            std::process::exit(1);
        }

        let page: ModelList = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to parse response: {e}");
                std::process::exit(1);
            }
        };

        for model in page
            .models
            .iter()
            .filter(|m| m.supported_generation_methods.iter().any(|s| s == "generateContent"))
        {
            println!("{}", model.name.trim_start_matches("models/"));
        }

        match page.next_page_token.filter(|t| !t.is_empty()) {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }
}
