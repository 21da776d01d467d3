//! The delegation seam: an untrusted asynchronous collaborator that decides
//! what to ask the model and narrates the outcome in free text.
//!
//! Nothing downstream parses the narration for file names. Callers drain the
//! events into one message and then look at the artifact store.

use std::sync::Arc;

use atelier_contracts::intent::{classify, TurnIntent};
use tokio::sync::mpsc;

use crate::studio::Studio;

const EVENT_BUFFER: usize = 16;

const GRID_PROMPT_TEMPLATE: &str = "Create ONE single image in 2x2 grid format (square) showing 4 DIFFERENT women's fashion outfits arranged in quadrants: top-left, top-right, bottom-left, bottom-right. Separate the quadrants with a thin white line and use a plain white studio background in each quadrant. Each outfit is worn by a realistic female model in a professional fashion photoshoot pose, fully visible, and differs from the other three in style, colour palette, fabric, silhouette, and occasion. No punk, gothic, distressed, or military styles; no costumes, armor, or male clothing.";

const CONVERSATION_REPLY: &str = "Hello! I can generate women's fashion looks as a set of four images, or edit one you've already made. Tell me what you'd like to see.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Generate,
    Edit { source: Option<String> },
    Chat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The full instruction as a delegate would read it.
    pub text: String,
    /// The user's own words.
    pub request: String,
    pub route: Route,
}

impl Instruction {
    pub fn generate(request: &str) -> Self {
        Self {
            text: request.to_string(),
            request: request.to_string(),
            route: Route::Generate,
        }
    }

    pub fn edit(edit_prompt: &str, source: &str) -> Self {
        Self {
            text: format!("Please edit the image {source}. Edit request: {edit_prompt}"),
            request: edit_prompt.to_string(),
            route: Route::Edit {
                source: Some(source.to_string()),
            },
        }
    }

    pub fn chat(message: &str) -> Self {
        Self {
            text: message.to_string(),
            request: message.to_string(),
            route: Route::Chat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationEvent {
    pub text: String,
    pub is_final: bool,
}

impl DelegationEvent {
    pub fn progress(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn done(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

pub trait Delegate: Send + Sync {
    /// Starts the delegated work and returns its event stream. The stream
    /// closes when the delegate is finished talking, which says nothing about
    /// whether files were written.
    fn run(&self, instruction: Instruction) -> mpsc::Receiver<DelegationEvent>;
}

/// Drains a delegation stream into one message: the text of the last final
/// event that carried any, else everything concatenated.
pub async fn collect_message(mut events: mpsc::Receiver<DelegationEvent>) -> String {
    let mut everything = String::new();
    let mut final_text: Option<String> = None;
    while let Some(event) = events.recv().await {
        if event.text.is_empty() {
            continue;
        }
        everything.push_str(&event.text);
        if event.is_final {
            final_text = Some(event.text);
        }
    }
    final_text.unwrap_or(everything)
}

pub fn grid_prompt(request: &str) -> String {
    format!("{GRID_PROMPT_TEMPLATE}\n\nRequest: {}", request.trim())
}

/// In-process delegate that drives the studio directly and narrates the
/// result the way an agent layer would, error text included.
#[derive(Clone)]
pub struct LocalDelegate {
    studio: Arc<Studio>,
}

impl LocalDelegate {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self { studio }
    }

    async fn perform(
        studio: &Studio,
        instruction: Instruction,
        events: &mpsc::Sender<DelegationEvent>,
    ) -> String {
        let route = match instruction.route {
            Route::Chat => match classify(&instruction.request) {
                TurnIntent::Edit => Route::Edit { source: None },
                TurnIntent::Generate => Route::Generate,
                TurnIntent::Converse => return CONVERSATION_REPLY.to_string(),
            },
            route => route,
        };

        match route {
            Route::Generate => {
                let _ = events
                    .send(DelegationEvent::progress("Generating four looks... "))
                    .await;
                match studio.generate(&grid_prompt(&instruction.request)).await {
                    Ok(manifest) => format!(
                        "Successfully generated images: {}",
                        manifest.artifacts.join(", ")
                    ),
                    Err(err) => format!("Error: {err}"),
                }
            }
            Route::Edit { source } => {
                let _ = events
                    .send(DelegationEvent::progress("Editing the image... "))
                    .await;
                match studio.edit(&instruction.request, source.as_deref()).await {
                    Ok(manifest) => format!("Successfully edited image: {}", manifest.artifact),
                    Err(err) => format!("Error: {err}"),
                }
            }
            Route::Chat => CONVERSATION_REPLY.to_string(),
        }
    }
}

impl Delegate for LocalDelegate {
    fn run(&self, instruction: Instruction) -> mpsc::Receiver<DelegationEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let studio = Arc::clone(&self.studio);
        tokio::spawn(async move {
            tracing::debug!(route = ?instruction.route, "delegating");
            let message = Self::perform(&studio, instruction, &tx).await;
            let _ = tx.send(DelegationEvent::done(message)).await;
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use atelier_contracts::ledger::RecencyLedger;
    use tokio::sync::mpsc;

    use super::*;
    use crate::models::DryrunModel;
    use crate::store::ArtifactStore;

    fn local(dir: &std::path::Path) -> anyhow::Result<(LocalDelegate, Arc<Studio>)> {
        let studio = Arc::new(Studio::new(
            ArtifactStore::open(dir)?,
            Arc::new(DryrunModel),
            Arc::new(Mutex::new(RecencyLedger::new())),
        ));
        Ok((LocalDelegate::new(Arc::clone(&studio)), studio))
    }

    #[tokio::test]
    async fn final_event_text_wins() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(DelegationEvent::progress("thinking... ")).await.ok();
        tx.send(DelegationEvent::done("All done.")).await.ok();
        tx.send(DelegationEvent::progress("")).await.ok();
        drop(tx);
        assert_eq!(collect_message(rx).await, "All done.");
    }

    #[tokio::test]
    async fn without_final_event_text_is_concatenated() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(DelegationEvent::progress("part one, ")).await.ok();
        tx.send(DelegationEvent::progress("part two")).await.ok();
        drop(tx);
        assert_eq!(collect_message(rx).await, "part one, part two");
    }

    #[test]
    fn edit_instruction_names_the_image() {
        let instruction = Instruction::edit("make it red", "image_1.png");
        assert_eq!(
            instruction.text,
            "Please edit the image image_1.png. Edit request: make it red"
        );
        assert_eq!(instruction.request, "make it red");
    }

    #[tokio::test]
    async fn local_delegate_generates_and_narrates() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (delegate, studio) = local(temp.path())?;
        let message = collect_message(delegate.run(Instruction::generate("silk gowns"))).await;
        assert!(message.starts_with("Successfully generated images: "), "{message}");
        assert_eq!(studio.store().list("", 10)?.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn local_delegate_narrates_errors_instead_of_failing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (delegate, _studio) = local(temp.path())?;
        let message = collect_message(delegate.run(Instruction::chat("edit it to be red"))).await;
        assert!(message.starts_with("Error: no image available"), "{message}");
        Ok(())
    }

    #[tokio::test]
    async fn local_delegate_answers_small_talk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (delegate, studio) = local(temp.path())?;
        let message = collect_message(delegate.run(Instruction::chat("hi there"))).await;
        assert_eq!(message, CONVERSATION_REPLY);
        assert!(studio.store().list("", 10)?.is_empty());
        Ok(())
    }
}
