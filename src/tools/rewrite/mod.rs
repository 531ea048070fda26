//! Best-effort rewriting of `grep` pipelines into `rg` invocations.
//!
//! A command line is split into simple commands joined by `| || && ; &`.
//! Each grep segment is translated independently; if any segment was
//! translated and ripgrep is available, the whole line is re-rendered.
//! Every other outcome runs the original text byte-for-byte.

mod grep;
mod detect;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CliOutputConfig;
use crate::runtime::approvals::ApprovalGate;

pub use detect::{
    looks_like_gnu_grep, GrepCompatibility, GrepDetector, ProvisionError, RipgrepLocator,
    SearchToolProvisioner, MANUAL_INSTALL_HINT,
};

/// Annotation attached to rewritten commands.
pub const REWRITE_ANNOTATION: &str = "auto-rewritten";
/// Footer hint shown under rewritten transcripts.
pub const REWRITE_FOOTER_HINT: &str = "disable via cli_output.replace_grep_with_rg";

const SEPARATORS: [&str; 5] = ["|", "||", "&&", ";", "&"];
const SUBSTITUTION_MARKERS: [&str; 4] = ["$(", "`", ")>", "<("];

/// Outcome of a rewrite attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteResult {
    /// Text handed to the shell.
    pub command_to_run: String,
    /// Text shown in the transcript header.
    pub display_command: String,
    pub annotation: Option<String>,
    /// Original text, present only when the command changed.
    pub original_command: Option<String>,
    pub prologue_lines: Vec<String>,
    pub footer_hint: Option<String>,
}

impl RewriteResult {
    fn unchanged(command: &str, prologue_lines: Vec<String>) -> Self {
        Self {
            command_to_run: command.to_string(),
            display_command: command.to_string(),
            annotation: None,
            original_command: None,
            prologue_lines,
            footer_hint: None,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        self.original_command.is_some()
    }
}

// ---------------------------------------------------------------------------
// Pipeline model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Operator(String),
    Command(SimpleCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimpleCommand {
    tokens: Vec<String>,
    rewrite: Option<RgInvocation>,
}

/// Translated segment: leading assignments, then the ripgrep arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RgInvocation {
    assignments: Vec<String>,
    args: Vec<String>,
}

fn split_pipeline(tokens: Vec<String>) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for token in tokens {
        if SEPARATORS.contains(&token.as_str()) {
            if !current.is_empty() {
                parts.push(Part::Command(SimpleCommand {
                    tokens: std::mem::take(&mut current),
                    rewrite: None,
                }));
            }
            parts.push(Part::Operator(token));
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        parts.push(Part::Command(SimpleCommand {
            tokens: current,
            rewrite: None,
        }));
    }
    parts
}

fn render_pipeline(parts: &[Part], program: &str) -> String {
    let rendered: Vec<String> = parts
        .iter()
        .map(|part| match part {
            Part::Operator(symbol) => symbol.clone(),
            Part::Command(command) => match &command.rewrite {
                Some(rg) => {
                    let mut words: Vec<String> =
                        rg.assignments.iter().map(|a| quote_assignment(a)).collect();
                    words.push(quote_token(program));
                    words.extend(rg.args.iter().map(|arg| quote_token(arg)));
                    words.join(" ")
                }
                None => render_simple_command(&command.tokens),
            },
        })
        .collect();
    rendered.join(" ").trim().to_string()
}

fn render_simple_command(tokens: &[String]) -> String {
    let assignments = tokens.iter().take_while(|t| looks_like_assignment(t)).count();
    tokens
        .iter()
        .enumerate()
        .map(|(idx, token)| {
            if idx < assignments {
                quote_assignment(token)
            } else {
                quote_token(token)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_'),
        None => false,
    }
}

/// Quote a word for `sh`, leaving plain words bare.
pub fn quote_token(token: &str) -> String {
    if token.is_empty() {
        return "''".to_string();
    }
    let plain = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', "'\\''"))
    }
}

/// Quote only the value of `NAME=value` so the shell still sees an assignment.
fn quote_assignment(token: &str) -> String {
    match token.split_once('=') {
        Some((name, value)) if value.is_empty() => format!("{name}="),
        Some((name, value)) => format!("{name}={}", quote_token(value)),
        None => quote_token(token),
    }
}

// ---------------------------------------------------------------------------
// Raw syntax scan
// ---------------------------------------------------------------------------

/// What word splitting cannot tell us about the raw command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SyntaxScan {
    /// Unquoted, whitespace-delimited control operators.
    operators: usize,
    /// No expansions, globs, redirections, grouping or glued operators.
    plain: bool,
}

fn scan_shell_syntax(command: &str) -> SyntaxScan {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let chars: Vec<char> = command.chars().collect();
    let is_blank = |c: char| c == ' ' || c == '\t';
    let mut scan = SyntaxScan {
        operators: 0,
        plain: true,
    };
    let mut quote = Quote::None;
    let mut word_start = true;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                }
                i += 1;
            }
            Quote::Double => {
                match c {
                    '"' => quote = Quote::None,
                    '\\' => i += 1,
                    '$' | '`' => scan.plain = false,
                    _ => {}
                }
                i += 1;
            }
            Quote::None => {
                if is_blank(c) {
                    word_start = true;
                    i += 1;
                    continue;
                }
                if matches!(c, '|' | '&' | ';') {
                    let start = i;
                    while i < chars.len() && matches!(chars[i], '|' | '&' | ';') {
                        i += 1;
                    }
                    let op: String = chars[start..i].iter().collect();
                    let bounded = (start == 0 || is_blank(chars[start - 1]))
                        && (i == chars.len() || is_blank(chars[i]));
                    if bounded && SEPARATORS.contains(&op.as_str()) {
                        scan.operators += 1;
                    } else {
                        scan.plain = false;
                    }
                    word_start = true;
                    continue;
                }
                match c {
                    '\'' => quote = Quote::Single,
                    '"' => quote = Quote::Double,
                    '\\' => i += 1,
                    '\n' | '\r' | '<' | '>' | '(' | ')' | '$' | '`' | '*' | '?' | '[' | '{'
                    | '}' => scan.plain = false,
                    '#' if word_start => scan.plain = false,
                    // Tilde expands at a word start and after `=` or `:` in
                    // assignments.
                    '~' if word_start || (i > 0 && matches!(chars[i - 1], '=' | ':')) => {
                        scan.plain = false
                    }
                    _ => {}
                }
                word_start = false;
                i += 1;
            }
        }
    }
    scan
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum SegmentOutcome {
    /// Not a grep invocation.
    Untouched,
    /// A grep invocation that cannot be translated safely.
    Skipped(&'static str),
    Rewritten(RgInvocation),
}

/// Rewrites grep invocations to ripgrep when the translation is exact.
#[derive(Clone)]
pub struct RewriteEngine {
    enabled: bool,
    compatibility: Arc<dyn GrepCompatibility>,
    provisioner: Arc<dyn SearchToolProvisioner>,
}

impl RewriteEngine {
    pub fn new(
        enabled: bool,
        compatibility: Arc<dyn GrepCompatibility>,
        provisioner: Arc<dyn SearchToolProvisioner>,
    ) -> Self {
        Self {
            enabled,
            compatibility,
            provisioner,
        }
    }

    /// Engine backed by the real grep detector and ripgrep locator.
    pub fn from_config(config: &CliOutputConfig) -> Self {
        Self::new(
            config.replace_grep_with_rg,
            Arc::new(GrepDetector::new()),
            Arc::new(RipgrepLocator::from_config(config)),
        )
    }

    /// Rewrite `command` if possible; otherwise return it unchanged with
    /// the reasons any grep segment was skipped.
    pub async fn rewrite(&self, command: &str, approvals: &ApprovalGate) -> RewriteResult {
        if !self.enabled || command.trim().is_empty() {
            return RewriteResult::unchanged(command, Vec::new());
        }
        let Some(tokens) = shlex::split(command) else {
            debug!(command, "rewrite skipped: failed to parse command");
            return RewriteResult::unchanged(command, Vec::new());
        };

        let separators = tokens
            .iter()
            .filter(|t| SEPARATORS.contains(&t.as_str()))
            .count();
        let scan = scan_shell_syntax(command);
        // A quoted `|` or `&&` shows up as a separator token after splitting.
        let representable = scan.plain && scan.operators == separators;

        let mut parts = split_pipeline(tokens);
        let mut rewrote = false;
        let mut prologue_lines = Vec::new();
        for part in &mut parts {
            let Part::Command(segment) = part else {
                continue;
            };
            match self.rewrite_segment(&segment.tokens, representable).await {
                SegmentOutcome::Untouched => {}
                SegmentOutcome::Skipped(reason) => {
                    warn!(reason, segment = %segment.tokens.join(" "), "grep rewrite skipped");
                    prologue_lines.push(format!("rewrite skipped: {reason}"));
                }
                SegmentOutcome::Rewritten(rg) => {
                    segment.rewrite = Some(rg);
                    rewrote = true;
                }
            }
        }

        if !rewrote {
            return RewriteResult::unchanged(command, prologue_lines);
        }

        let program = match self.provisioner.ensure_available(approvals).await {
            Ok(program) => program,
            Err(err) => {
                let message = format!("ripgrep unavailable: {err}. {MANUAL_INSTALL_HINT}");
                warn!("{message}");
                prologue_lines.push(message);
                return RewriteResult::unchanged(command, prologue_lines);
            }
        };

        let rewritten = render_pipeline(&parts, &program);
        info!(original = command, rewritten = %rewritten, "rewrote grep command");
        let mut prologue = vec![format!("original: {command}")];
        prologue.extend(prologue_lines);
        RewriteResult {
            command_to_run: rewritten.clone(),
            display_command: rewritten,
            annotation: Some(REWRITE_ANNOTATION.to_string()),
            original_command: Some(command.to_string()),
            prologue_lines: prologue,
            footer_hint: Some(REWRITE_FOOTER_HINT.to_string()),
        }
    }

    async fn rewrite_segment(&self, tokens: &[String], representable: bool) -> SegmentOutcome {
        let assignments = tokens.iter().take_while(|t| looks_like_assignment(t)).count();
        let Some(name) = tokens.get(assignments) else {
            return SegmentOutcome::Untouched;
        };
        if !grep::SUPPORTED_COMMANDS.contains(&name.as_str()) {
            return SegmentOutcome::Untouched;
        }
        if tokens
            .iter()
            .any(|t| SUBSTITUTION_MARKERS.iter().any(|marker| t.contains(marker)))
        {
            return SegmentOutcome::Skipped("unsupported substitution");
        }
        if !representable {
            return SegmentOutcome::Skipped("unsupported shell syntax");
        }
        if !self.compatibility.is_compatible(name).await {
            return SegmentOutcome::Skipped("detected non-GNU grep binary");
        }
        match grep::translate_grep_args(name, &tokens[assignments + 1..]) {
            Some(args) => SegmentOutcome::Rewritten(RgInvocation {
                assignments: tokens[..assignments].to_vec(),
                args,
            }),
            None => SegmentOutcome::Skipped("unsupported grep arguments"),
        }
    }
}


#[cfg(all(test, feature = "fuzz-tests"))]
mod fuzz_tests {
    use super::*;
    use crate::runtime::approvals::ApprovalPolicy;
    use crate::testsupport::{FakeGrepCompatibility, FakeProvisioner};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn lines_without_grep_are_never_modified(command in "[a-fh-z0-9 |&;'\"=._-]{0,40}") {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let engine = RewriteEngine::new(
                true,
                Arc::new(FakeGrepCompatibility::new(true)),
                Arc::new(FakeProvisioner::new(Ok("rg".into()))),
            );
            let gate = ApprovalGate::detached(ApprovalPolicy::default());
            let result = runtime.block_on(engine.rewrite(&command, &gate));
            prop_assert_eq!(result.command_to_run, command);
        }
    }
}
