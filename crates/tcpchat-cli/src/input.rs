//! Parsing of lines typed at the prompt.

/// What a line of user input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Chat(String),
    Whisper { to: String, body: String },
    Users,
    Quit,
    /// Blank line.
    Nothing,
    /// A malformed command, with a usage hint.
    Usage(&'static str),
}

pub fn parse_line(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Input::Nothing;
    }

    let mut words = line.splitn(2, ' ');
    match words.next().unwrap_or_default() {
        "/quit" | "/q" => Input::Quit,
        "/users" => Input::Users,
        "/w" | "/whisper" => {
            let rest = words.next().unwrap_or_default().trim_start();
            match rest.split_once(' ') {
                Some((to, body)) if !body.trim().is_empty() => Input::Whisper {
                    to: to.to_string(),
                    body: body.to_string(),
                },
                _ => Input::Usage("usage: /w <user> <message>"),
            }
        }
        _ => Input::Chat(line.to_string()),
    }
}
