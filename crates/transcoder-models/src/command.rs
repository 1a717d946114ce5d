//! Control commands published on a job's command channel.

use std::fmt;
use std::str::FromStr;

/// Command understood by a running job's listener.
///
/// On the wire these are the bare strings `status` and `kill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCommand {
    Status,
    Kill,
}

impl JobCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCommand::Status => "status",
            JobCommand::Kill => "kill",
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(JobCommand::Status),
            "kill" => Ok(JobCommand::Kill),
            other => Err(format!("unknown job command: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("status".parse::<JobCommand>(), Ok(JobCommand::Status));
        assert_eq!("kill".parse::<JobCommand>(), Ok(JobCommand::Kill));
        assert!("KILL".parse::<JobCommand>().is_err());
        assert_eq!(JobCommand::Kill.to_string(), "kill");
    }
}
