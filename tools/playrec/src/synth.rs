use crate::errors::RecorderError;
use crate::session::{Action, CodeLine};
use crate::types::Browser;
use sha2::{Digest, Sha256};

const BODY_INDENT: &str = "    ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptTemplate {
    pub browser: Browser,
    pub headless: bool,
}

impl Default for ScriptTemplate {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: false,
        }
    }
}

impl ScriptTemplate {
    pub fn preamble(&self) -> String {
        let headless = if self.headless { "True" } else { "False" };
        format!(
            "import asyncio\n\
             import re\n\
             from playwright.async_api import Playwright, async_playwright, expect\n\
             \n\
             \n\
             async def run(playwright: Playwright) -> None:\n\
             {BODY_INDENT}browser = await playwright.{}.launch(headless={headless})\n\
             {BODY_INDENT}context = await browser.new_context()\n\
             {BODY_INDENT}page = await context.new_page()\n",
            self.browser.as_str()
        )
    }

    pub fn teardown(&self) -> String {
        format!(
            "\n\
             {BODY_INDENT}# ---------------------\n\
             {BODY_INDENT}await context.close()\n\
             {BODY_INDENT}await browser.close()\n\
             \n\
             \n\
             async def main() -> None:\n\
             {BODY_INDENT}async with async_playwright() as playwright:\n\
             {BODY_INDENT}{BODY_INDENT}await run(playwright)\n\
             \n\
             \n\
             asyncio.run(main())\n"
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodeSynthesizer {
    actions: Vec<Action>,
    frozen: bool,
    template: ScriptTemplate,
}

impl CodeSynthesizer {
    pub fn new(template: ScriptTemplate) -> Self {
        Self {
            actions: Vec::new(),
            frozen: false,
            template,
        }
    }

    /// Called when a new session starts.
    pub fn reset(&mut self) {
        self.actions.clear();
        self.frozen = false;
    }

    /// Appends the next action. Returns its code line when it carries a
    /// fragment. Out-of-order sequence numbers and appends after freeze are
    /// refused so the rendered code stays a prefix of the final script.
    pub fn append(&mut self, action: Action) -> Result<Option<CodeLine>, RecorderError> {
        if self.frozen {
            return Err(RecorderError::Protocol(format!(
                "action #{} arrived after the script was frozen",
                action.sequence
            )));
        }
        let expected = self.actions.last().map_or(1, |last| last.sequence + 1);
        if action.sequence != expected {
            return Err(RecorderError::Protocol(format!(
                "action #{} out of order; expected #{expected}",
                action.sequence
            )));
        }
        let line = CodeLine::from_action(&action);
        self.actions.push(action);
        Ok(line)
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn render_partial(&self) -> Vec<CodeLine> {
        self.actions.iter().filter_map(CodeLine::from_action).collect()
    }

    /// Body statements so far, indented into the run routine.
    pub fn render_body(&self) -> String {
        let mut body = String::new();
        for line in self.render_partial() {
            for statement in line.code.lines() {
                if statement.trim().is_empty() {
                    body.push('\n');
                } else {
                    body.push_str(BODY_INDENT);
                    body.push_str(statement.trim_end());
                    body.push('\n');
                }
            }
        }
        body
    }

    /// Full script, only once frozen and only when at least one fragment
    /// was recorded.
    pub fn render_complete(&self) -> Option<String> {
        if !self.frozen || !self.actions.iter().any(Action::has_fragment) {
            return None;
        }
        let mut script = self.template.preamble();
        script.push_str(&self.render_body());
        script.push_str(&self.template.teardown());
        Some(script)
    }
}

pub fn script_digest(script: &str) -> String {
    let digest = Sha256::digest(script.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
