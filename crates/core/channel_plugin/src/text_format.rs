//! Converts a `ChatEgressEnvelope`'s common-markdown text into a target
//! platform's own inline-formatting syntax (WhatsApp: `*bold*`, `_italic_`,
//! `~strike~`, `` ```mono``` ``).

use once_cell::sync::Lazy;
use regex::Regex;

static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+)\*").unwrap());
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*\n]+)\*\*").unwrap());
static STRIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~([^~\n]+)~~").unwrap());
static MONO: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").unwrap());

/// `preserve_bold_italic_bug` reproduces an observed conversion defect:
/// running the single-asterisk italic pass before the double-asterisk bold
/// pass lets the italic regex consume a bold span first, so `**x**` comes
/// out as `_x_` instead of `*x*`. Left on by default for behavioral
/// parity with already-deployed relays.
///
/// TODO: flip the default once every adapter has coverage for mixed
/// bold/italic text in one message and a migration path for relays that
/// depend on the current (buggy) output.
#[derive(Debug, Clone, Copy)]
pub struct MarkdownConversionOptions {
    pub preserve_bold_italic_bug: bool,
}

impl Default for MarkdownConversionOptions {
    fn default() -> Self {
        MarkdownConversionOptions {
            preserve_bold_italic_bug: true,
        }
    }
}

/// Converts common markdown to WhatsApp's inline-formatting syntax.
pub fn convert_to_whatsapp(text: &str, options: MarkdownConversionOptions) -> String {
    let text = STRIKE.replace_all(text, "~$1~");
    let text = MONO.replace_all(&text, "```$1```");

    let text = if options.preserve_bold_italic_bug {
        // Italic first: `**x**` is also a valid `*...*` match one character
        // in, so this pass fires on bold spans before BOLD ever sees them.
        let text = ITALIC.replace_all(&text, "_$1_");
        BOLD.replace_all(&text, "*$1*").into_owned()
    } else {
        let text = BOLD.replace_all(&text, "\u{0}$1\u{0}");
        let text = ITALIC.replace_all(&text, "_$1_");
        text.replace('\u{0}', "*")
    };

    text
}
