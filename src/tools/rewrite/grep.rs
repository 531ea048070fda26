//! Translation of grep argument lists into equivalent ripgrep arguments.
//!
//! Only flags with an exact ripgrep counterpart are accepted. Anything else
//! makes [`translate_grep_args`] return `None` so the caller runs the
//! original command.

/// Command names the engine knows how to translate.
pub(super) const SUPPORTED_COMMANDS: [&str; 3] = ["grep", "egrep", "fgrep"];

const FIXED_STRINGS: &str = "--fixed-strings";

fn bool_flag(arg: &str) -> Option<&'static str> {
    match arg {
        "-n" => Some("--line-number"),
        "-i" => Some("--ignore-case"),
        "-v" => Some("--invert-match"),
        "-w" => Some("--word-regexp"),
        _ => None,
    }
}

fn context_flag(arg: &str) -> Option<&'static str> {
    match arg {
        "-A" => Some("--after-context"),
        "-B" => Some("--before-context"),
        "-C" => Some("--context"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Basic,
    Extended,
    Fixed,
}

struct Pattern {
    text: String,
    from_flag: bool,
}

/// Translate `name args...` into ripgrep arguments (program excluded).
pub(super) fn translate_grep_args(name: &str, args: &[String]) -> Option<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut syntax = match name {
        "fgrep" => Syntax::Fixed,
        "egrep" => Syntax::Extended,
        _ => Syntax::Basic,
    };
    if syntax == Syntax::Fixed {
        out.push(FIXED_STRINGS.to_string());
    }

    let mut patterns: Vec<Pattern> = Vec::new();
    let mut files_after_double_dash = false;
    let mut recursive = false;
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if arg == "--" {
            files_after_double_dash = true;
            i += 1;
            break;
        }
        if arg == "-r" || arg == "-R" {
            recursive = true;
            i += 1;
            continue;
        }
        if let Some(long) = bool_flag(arg) {
            out.push(long.to_string());
            i += 1;
            continue;
        }
        if let Some(long) = context_flag(arg) {
            let value = args.get(i + 1)?;
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            out.push(long.to_string());
            out.push(value.clone());
            i += 2;
            continue;
        }
        if arg == "-e" {
            let value = args.get(i + 1)?;
            patterns.push(Pattern {
                text: value.clone(),
                from_flag: true,
            });
            i += 2;
            continue;
        }
        if let Some(value) = arg.strip_prefix("-e") {
            patterns.push(Pattern {
                text: value.to_string(),
                from_flag: true,
            });
            i += 1;
            continue;
        }
        if arg == "--include" || arg == "--exclude" {
            let value = args.get(i + 1)?;
            out.push("--glob".to_string());
            out.push(glob_for(arg == "--include", value));
            i += 2;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--include=") {
            out.push("--glob".to_string());
            out.push(glob_for(true, value));
            i += 1;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--exclude=") {
            out.push("--glob".to_string());
            out.push(glob_for(false, value));
            i += 1;
            continue;
        }
        if arg == "--color=never" {
            out.push("--color=never".to_string());
            i += 1;
            continue;
        }
        if arg == "--color" && args.get(i + 1).map(String::as_str) == Some("never") {
            out.push("--color=never".to_string());
            i += 2;
            continue;
        }
        if arg == "-F" || arg == FIXED_STRINGS {
            if !out.iter().any(|token| token == FIXED_STRINGS) {
                out.push(FIXED_STRINGS.to_string());
            }
            syntax = Syntax::Fixed;
            i += 1;
            continue;
        }
        if arg == "-E" || arg == "--extended-regexp" {
            if syntax != Syntax::Fixed {
                syntax = Syntax::Extended;
            }
            i += 1;
            continue;
        }
        if arg.starts_with('-') {
            return None;
        }
        break;
    }

    let remainder = &args[i..];
    let files = if patterns.is_empty() {
        let (first, rest) = remainder.split_first()?;
        patterns.push(Pattern {
            text: first.clone(),
            from_flag: false,
        });
        rest
    } else {
        remainder
    };

    if !patterns
        .iter()
        .all(|pattern| pattern_is_portable(&pattern.text, syntax))
    {
        return None;
    }

    match patterns.as_slice() {
        [only] if !only.from_flag => {
            // A positional pattern that looks like a flag would be parsed
            // as one by ripgrep.
            if only.text.starts_with('-') {
                out.push("-e".to_string());
            }
            out.push(only.text.clone());
        }
        _ => {
            for pattern in patterns {
                out.push("-e".to_string());
                out.push(pattern.text);
            }
        }
    }

    if !files.is_empty() {
        if files_after_double_dash {
            out.push("--".to_string());
        }
        out.extend(files.iter().cloned());
    } else if !recursive {
        // grep without operands reads stdin; ripgrep would search the
        // working directory unless told otherwise.
        out.push("-".to_string());
    }
    Some(out)
}

fn glob_for(include: bool, pattern: &str) -> String {
    if include {
        pattern.to_string()
    } else {
        format!("!{pattern}")
    }
}

/// Whether `pattern` means the same thing to grep and to ripgrep.
///
/// Basic regular expressions treat `+ ? | ( ) { }` as literals and use
/// backslash escapes for the operators, which ripgrep reads the other way
/// around. Backreferences have no ripgrep equivalent.
fn pattern_is_portable(pattern: &str, syntax: Syntax) -> bool {
    match syntax {
        Syntax::Fixed => true,
        Syntax::Basic => !pattern
            .chars()
            .any(|c| matches!(c, '\\' | '+' | '?' | '|' | '(' | ')' | '{' | '}')),
        Syntax::Extended => {
            let mut chars = pattern.chars();
            while let Some(c) = chars.next() {
                if c == '\\' && chars.next().is_some_and(|next| next.is_ascii_digit()) {
                    return false;
                }
            }
            true
        }
    }
}
