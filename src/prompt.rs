//! Terminal prompts for a person watching the strip.

use async_trait::async_trait;
use ideal_led_lib::feedback::{OperatorFeedback, SweepFeedback};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

pub struct InteractiveFeedback {
    lines: Lines<BufReader<Stdin>>,
}

impl InteractiveFeedback {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Print `question` and read one trimmed line. `None` on EOF or read error.
    async fn ask(&mut self, question: &str) -> Option<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(question.as_bytes()).await.ok()?;
        stdout.flush().await.ok()?;
        self.lines.next_line().await.ok().flatten().map(|l| l.trim().to_lowercase())
    }
}

impl Default for InteractiveFeedback {
    fn default() -> Self {
        Self::new()
    }
}

/// LEDs are numbered from 1 for the operator.
fn pixel_question(index: u16) -> String {
    format!("Is LED #{} lit red? [y/n/skip] ", u32::from(index) + 1)
}

fn yes_no(answer: &str) -> Option<bool> {
    match answer {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[async_trait]
impl OperatorFeedback for InteractiveFeedback {
    async fn pixel_lit(&mut self, index: u16) -> Option<bool> {
        let answer = self.ask(&pixel_question(index)).await?;
        yes_no(&answer)
    }

    async fn sweep_step(&mut self, requested: u16) -> SweepFeedback {
        let lit = self
            .ask(&format!("Count set to {requested}. How many LEDs are lit? [number/skip] "))
            .await
            .and_then(|a| a.parse().ok());
        let flicker = self
            .ask("Any flicker or dimming towards the end? [y/n] ")
            .await
            .and_then(|a| yes_no(&a))
            .unwrap_or(false);
        SweepFeedback { lit, flicker }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_no() {
        assert_eq!(yes_no("y"), Some(true));
        assert_eq!(yes_no("no"), Some(false));
        assert_eq!(yes_no("skip"), None);
        assert_eq!(yes_no(""), None);
    }

    #[test]
    fn test_pixel_question_numbers_from_one() {
        assert_eq!(pixel_question(0), "Is LED #1 lit red? [y/n/skip] ");
        assert_eq!(pixel_question(u16::MAX), "Is LED #65536 lit red? [y/n/skip] ");
    }
}
