use std::time::Duration;

use serde::{Deserialize, Serialize};
use sling_http::{RetryOptions, Sling, Target};

#[derive(Serialize)]
struct IssueQuery {
    state: &'static str,
    per_page: u32,
}

#[derive(Debug, Default, Deserialize)]
struct Issue {
    number: u64,
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct GithubError {
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let token = std::env::var("GITHUB_TOKEN")?;

    let github = Sling::new()
        .base("https://api.github.com/")
        .set_header("Accept", "application/vnd.github+json")
        .bearer_auth(&token)
        .timeout(Duration::from_secs(30))
        .auto_retry(RetryOptions::default().max_attempts(3));

    let mut issues: Vec<Issue> = Vec::new();
    let mut failure = GithubError::default();
    let response = github
        .branch()
        .get("repos/rust-lang/rust/issues")
        .query_struct(IssueQuery {
            state: "open",
            per_page: 5,
        })
        .receive(Target::typed(&mut issues), Target::typed(&mut failure))
        .await?;

    println!("status: {:?}", response.status());
    if !failure.message.is_empty() {
        println!("error: {}", failure.message);
    }
    for issue in issues {
        println!("#{} {}", issue.number, issue.title);
    }

    Ok(())
}
