use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "bot" => Ok(Role::Bot),
            other => Err(format!("Unknown message role: '{}'", other)),
        }
    }
}

/// A named conversation thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One turn of a session, written either by the user or by the bot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_camel_case_with_lowercase_role() {
        let msg = Message {
            id: "m1".into(),
            session_id: "s1".into(),
            role: Role::Bot,
            content: "hi".into(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["role"], "bot");
        assert!(value.get("session_id").is_none());
    }

    #[test]
    fn test_role_from_str_rejects_unknown() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("assistant".parse::<Role>().is_err());
    }
}
