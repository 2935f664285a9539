//! Embedded command grammar: `[LAUNCH:<payload>]` and `[SEARCH:<payload>]`.
//!
//! Keywords match case-insensitively. The payload is everything up to the
//! next `]`; there is no escaping, so a payload cannot itself contain `]`.
//! An opening token with no closing bracket is left as plain text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCommand {
    Launch(String),
    Search(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Launch,
    Search,
}

const KEYWORDS: [(&str, Kind); 2] = [("LAUNCH:", Kind::Launch), ("SEARCH:", Kind::Search)];

struct Token<'a> {
    kind: Kind,
    payload: &'a str,
    start: usize,
    end: usize,
}

/// Scan left to right for complete command tokens.
fn scan(text: &str) -> Vec<Token<'_>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('[') {
        let open = pos + offset;
        let after = open + 1;

        let keyword = KEYWORDS.iter().find(|(kw, _)| {
            bytes
                .get(after..after + kw.len())
                .is_some_and(|b| b.eq_ignore_ascii_case(kw.as_bytes()))
        });

        let Some((kw, kind)) = keyword else {
            pos = after;
            continue;
        };

        let payload_start = after + kw.len();
        let Some(len) = text[payload_start..].find(']') else {
            break;
        };
        let close = payload_start + len;
        tokens.push(Token {
            kind: *kind,
            payload: &text[payload_start..close],
            start: open,
            end: close + 1,
        });
        pos = close + 1;
    }

    tokens
}

fn first_payload(text: &str, kind: Kind) -> Option<String> {
    scan(text)
        .into_iter()
        .find(|t| t.kind == kind)
        .map(|t| t.payload.trim().to_string())
        .filter(|p| !p.is_empty())
}

/// First SEARCH payload, trimmed. Blank payloads count as absent.
pub fn extract_search_query(text: &str) -> Option<String> {
    first_payload(text, Kind::Search)
}

/// First LAUNCH payload, trimmed. Blank payloads count as absent.
pub fn extract_launch_target(text: &str) -> Option<String> {
    first_payload(text, Kind::Launch)
}

/// At most one command of each kind, in order of appearance.
pub fn parse_commands(text: &str) -> Vec<ToolCommand> {
    let (mut seen_launch, mut seen_search) = (false, false);
    let mut commands = Vec::with_capacity(2);
    for token in scan(text) {
        let seen = match token.kind {
            Kind::Launch => &mut seen_launch,
            Kind::Search => &mut seen_search,
        };
        if std::mem::replace(seen, true) {
            continue;
        }
        let payload = token.payload.trim();
        if payload.is_empty() {
            continue;
        }
        commands.push(match token.kind {
            Kind::Launch => ToolCommand::Launch(payload.to_string()),
            Kind::Search => ToolCommand::Search(payload.to_string()),
        });
    }
    commands
}

/// Remove every command token and trim the result.
///
/// Removal repeats until no token is left, since cutting one token out can
/// join the text around it into a new one. That makes stripping idempotent.
pub fn strip_commands(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let tokens = scan(&current);
        if tokens.is_empty() {
            break;
        }
        let mut out = String::with_capacity(current.len());
        let mut pos = 0;
        for t in &tokens {
            out.push_str(&current[pos..t.start]);
            pos = t.end;
        }
        out.push_str(&current[pos..]);
        current = out;
    }
    current.trim().to_string()
}
