use thiserror::Error;

/// A parsed prefix command. Positions are already converted to the 0-based
/// indices the session controller works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Pause,
    Resume,
    Stop,
    Skip,
    Previous,
    Loop,
    Shuffle,
    Move { from: usize, to: usize },
    Remove(usize),
    Clear,
    Volume(Option<i64>),
    Queue,
    History,
    SongInfo,
    Connect,
    Disconnect,
    Settings,
    Set { name: String, value: String },
    Ping,
    Help,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Usage: `{0}`")]
    Usage(&'static str),
    #[error("`{0}` is not a valid position, positions start at 1")]
    BadPosition(String),
    #[error("`{0}` is not a number")]
    NotANumber(String),
}

impl Command {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play(_) => "play",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::Skip => "skip",
            Command::Previous => "prev",
            Command::Loop => "loop",
            Command::Shuffle => "shuffle",
            Command::Move { .. } => "move",
            Command::Remove(_) => "remove",
            Command::Clear => "clear",
            Command::Volume(_) => "volume",
            Command::Queue => "queue",
            Command::History => "history",
            Command::SongInfo => "songinfo",
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::Settings => "settings",
            Command::Set { .. } => "set",
            Command::Ping => "ping",
            Command::Help => "help",
        }
    }

    /// Commands that only read or change guild settings and never touch the
    /// voice session.
    pub fn is_administrative(&self) -> bool {
        matches!(
            self,
            Command::Settings | Command::Set { .. } | Command::Ping | Command::Help
        )
    }
}

/// Parses a message. `Ok(None)` means the message is not a command for us:
/// missing prefix or an unknown name.
pub fn parse(content: &str, prefix: &str) -> Result<Option<Command>, CommandError> {
    let Some(body) = content.trim_start().strip_prefix(prefix) else {
        return Ok(None);
    };

    let body = body.trim();
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "play" | "p" | "yt" | "pl" => {
            if args.is_empty() {
                return Err(CommandError::Usage("play <link or search words>"));
            }
            Command::Play(args.to_string())
        }
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "stop" | "st" => Command::Stop,
        "skip" | "s" => Command::Skip,
        "prev" | "back" => Command::Previous,
        "loop" | "l" => Command::Loop,
        "shuffle" | "sh" => Command::Shuffle,
        "move" | "mv" => {
            let mut positions = args.split_whitespace();
            match (positions.next(), positions.next()) {
                (Some(from), Some(to)) => Command::Move {
                    from: position(from)?,
                    to: position(to)?,
                },
                _ => return Err(CommandError::Usage("move <from> <to>")),
            }
        }
        "remove" | "rm" => match args.split_whitespace().next() {
            Some(pos) => Command::Remove(position(pos)?),
            None => return Err(CommandError::Usage("remove <position>")),
        },
        "clear" | "cl" => Command::Clear,
        "volume" | "vol" => match args.split_whitespace().next() {
            Some(value) => Command::Volume(Some(
                value
                    .parse()
                    .map_err(|_| CommandError::NotANumber(value.to_string()))?,
            )),
            None => Command::Volume(None),
        },
        "queue" | "q" | "playlist" => Command::Queue,
        "history" => Command::History,
        "songinfo" | "np" => Command::SongInfo,
        "connect" | "join" => Command::Connect,
        "disconnect" | "leave" | "dc" => Command::Disconnect,
        "settings" => Command::Settings,
        "set" => match args.split_once(char::is_whitespace) {
            Some((name, value)) => Command::Set {
                name: name.to_string(),
                value: value.trim().to_string(),
            },
            None => return Err(CommandError::Usage("set <name> <value>")),
        },
        "ping" => Command::Ping,
        "help" => Command::Help,
        _ => return Ok(None),
    };

    Ok(Some(command))
}

/// 1-based user position to 0-based index.
fn position(raw: &str) -> Result<usize, CommandError> {
    match raw.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(CommandError::BadPosition(raw.to_string())),
    }
}

/// Why a command was refused before reaching the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    WrongChannel(u64),
    NotWithBot,
}

impl AccessDenied {
    pub fn message(&self) -> String {
        match self {
            AccessDenied::WrongChannel(channel) => {
                format!("Commands are only accepted in <#{}>", channel)
            }
            AccessDenied::NotWithBot => {
                "You must be in the same voice channel as the bot".to_string()
            }
        }
    }
}

/// Where the command came from, as far as the access rules care.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandContext {
    pub text_channel: u64,
    pub author_voice: Option<u64>,
    pub bot_voice: Option<u64>,
}

/// Applies the guild's command channel and voice presence rules.
/// Administrative commands only obey the channel rule.
pub fn check_access(
    command: &Command,
    command_channel: Option<u64>,
    user_must_be_in_vc: bool,
    ctx: CommandContext,
) -> Result<(), AccessDenied> {
    if let Some(required) = command_channel {
        if required != ctx.text_channel {
            return Err(AccessDenied::WrongChannel(required));
        }
    }

    if user_must_be_in_vc && !command.is_administrative() {
        if let Some(bot_channel) = ctx.bot_voice {
            if ctx.author_voice != Some(bot_channel) {
                return Err(AccessDenied::NotWithBot);
            }
        }
    }

    Ok(())
}

pub const HELP_TEXT: &str = "\
`play|p <link or words>` queue a song, playlist or search
`pause` / `resume` pause or resume playback
`stop|st` stop and clear the queue
`skip|s` skip the current song
`prev|back` play the previous song
`loop|l` toggle looping the current song
`shuffle|sh` shuffle the queue
`move|mv <from> <to>` move a queued song
`remove|rm <pos>` remove a queued song
`clear|cl` clear the queue
`volume|vol [0-100]` show or change the volume
`queue|q` show the queue
`history` recently played songs
`songinfo|np` the current song
`connect|join` / `disconnect|dc` join or leave your voice channel
`settings` / `set <name> <value>` guild settings
`ping` latency check";
