//! Terminal collaborators: credential prompts and progress output

use async_trait::async_trait;

use rb_core::traits::ProgressSink;
use rb_remote::auth::{PromptRequest, Prompter};

use crate::output::print_info;

/// Asks for credentials on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

fn ask(request: &PromptRequest) -> Option<String> {
    let answer = if request.echo {
        dialoguer::Input::<String>::new()
            .with_prompt(&request.message)
            .allow_empty(true)
            .interact_text()
    } else {
        dialoguer::Password::new()
            .with_prompt(&request.message)
            .allow_empty_password(true)
            .interact()
    };

    match answer {
        Ok(answer) => Some(answer),
        Err(e) => {
            tracing::debug!("Prompt cancelled: {}", e);
            None
        }
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn prompt(&self, request: PromptRequest) -> Option<String> {
        // dialoguer blocks on the terminal
        tokio::task::spawn_blocking(move || ask(&request))
            .await
            .ok()
            .flatten()
    }
}

/// Prints progress lines to the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn report(&self, message: &str) {
        tracing::debug!("{}", message);
        print_info(message);
    }
}
