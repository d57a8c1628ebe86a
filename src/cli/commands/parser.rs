use super::types::Command;
use crate::security::UpdateKey;

/// Parses one console line. Blank input yields `None`.
pub fn parse_command(input: &str) -> Option<Command> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let cmd = parts.next()?.to_lowercase();
    let args = parts.next().unwrap_or("").trim();

    let command = match cmd.as_str() {
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "flags" => Command::Flags,
        "name" if args.is_empty() => Command::Usage("name <new name>"),
        "name" => Command::Name(args.to_string()),
        "autoupdate" => match args.to_lowercase().as_str() {
            "on" => Command::AutoUpdate(true),
            "off" => Command::AutoUpdate(false),
            _ => Command::Usage("autoupdate on|off"),
        },
        "autointerval" => match args.parse::<u32>() {
            Ok(minutes) if minutes >= 1 => Command::AutoInterval(minutes),
            _ => Command::Usage("autointerval <minutes, at least 1>"),
        },
        "setkey" => match UpdateKey::new(args) {
            Some(key) => Command::SetKey(key),
            None => Command::Usage("setkey <secret>"),
        },
        "updatecheck" => Command::UpdateCheck,
        "update" => Command::Update,
        "rollback" => Command::Rollback,
        "save" => Command::Save,
        "panic" if args.eq_ignore_ascii_case("save") => Command::PanicSave,
        "panic" => Command::Usage("panic save"),
        "selfcheck" => Command::SelfCheck,
        "modules" => Command::Modules,
        "activate" if args.is_empty() => Command::Usage("activate <module>"),
        "activate" => Command::Activate(args.to_string()),
        "deactivate" if args.is_empty() => Command::Usage("deactivate <module>"),
        "deactivate" => Command::Deactivate(args.to_string()),
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(cmd),
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_command() {
        assert_eq!(parse_command("status"), Some(Command::Status));
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(parse_command("STATUS"), Some(Command::Status));
        assert_eq!(parse_command("AutoUpdate ON"), Some(Command::AutoUpdate(true)));
    }

    #[test]
    fn blank_input_returns_none() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn name_keeps_inner_spaces() {
        assert_eq!(
            parse_command("name  Nova Prime "),
            Some(Command::Name("Nova Prime".into()))
        );
    }

    #[test]
    fn name_without_argument_is_usage() {
        assert!(matches!(parse_command("name"), Some(Command::Usage(_))));
    }

    #[test]
    fn autoupdate_requires_on_or_off() {
        assert_eq!(parse_command("autoupdate off"), Some(Command::AutoUpdate(false)));
        assert!(matches!(
            parse_command("autoupdate maybe"),
            Some(Command::Usage(_))
        ));
    }

    #[test]
    fn autointerval_rejects_zero_and_garbage() {
        assert_eq!(parse_command("autointerval 15"), Some(Command::AutoInterval(15)));
        assert!(matches!(parse_command("autointerval 0"), Some(Command::Usage(_))));
        assert!(matches!(parse_command("autointerval soon"), Some(Command::Usage(_))));
    }

    #[test]
    fn setkey_wraps_secret_and_debug_redacts() {
        let parsed = parse_command("setkey s3cret").unwrap();
        assert_eq!(parsed, Command::SetKey(UpdateKey::new("s3cret").unwrap()));
        assert!(!format!("{parsed:?}").contains("s3cret"));
    }

    #[test]
    fn setkey_blank_is_usage() {
        assert!(matches!(parse_command("setkey   "), Some(Command::Usage(_))));
    }

    #[test]
    fn panic_save_is_two_words() {
        assert_eq!(parse_command("panic save"), Some(Command::PanicSave));
        assert!(matches!(parse_command("panic"), Some(Command::Usage(_))));
    }

    #[test]
    fn module_commands() {
        assert_eq!(parse_command("modules"), Some(Command::Modules));
        assert_eq!(
            parse_command("activate voice"),
            Some(Command::Activate("voice".into()))
        );
        assert_eq!(
            parse_command("deactivate voice"),
            Some(Command::Deactivate("voice".into()))
        );
    }

    #[test]
    fn quit_and_exit_alias() {
        assert_eq!(parse_command("quit"), Some(Command::Quit));
        assert_eq!(parse_command("exit"), Some(Command::Quit));
    }

    #[test]
    fn unknown_verb_is_reported() {
        assert_eq!(
            parse_command("dance now"),
            Some(Command::Unknown("dance".into()))
        );
    }
}
