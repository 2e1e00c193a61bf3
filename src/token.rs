//! Opaque game identifiers.
//!
//! Tokens are fixed-length byte arrays drawn from an alphanumeric charset
//! rather than strings or UUIDs: cheap to copy, cheap to hash, and short
//! enough to read aloud or type into a join box.

use rand_core::{OsRng, RngCore};
use serde::{de::Visitor, Deserialize, Serialize};
use std::{fmt, hash::Hash, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gameId is not a valid token")]
pub struct InvalidGameId;

/// Opaque unique identifier for a game (§3 `Game.id`).
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct GameId([u8; GameId::LENGTH]);

impl GameId {
    const LENGTH: usize = 5;
    const CHARSET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Draws a random token. Uniqueness against already-live games is the
    /// caller's responsibility (the Hub loop retries until it finds a free
    /// one, since only it may read the game map).
    pub fn random() -> GameId {
        const RANGE: usize = GameId::CHARSET.len();
        let mut rng = OsRng;
        let mut token = [0u8; GameId::LENGTH];

        for slot in token.iter_mut() {
            loop {
                let candidate = (rng.next_u32() >> (32 - 6)) as usize;
                if candidate < RANGE {
                    *slot = GameId::CHARSET[candidate];
                    break;
                }
            }
        }

        GameId(token)
    }

    fn as_str(&self) -> &str {
        // Every byte was written from CHARSET, which is pure ASCII.
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GameId({})", self.as_str())
    }
}

impl FromStr for GameId {
    type Err = InvalidGameId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != GameId::LENGTH {
            return Err(InvalidGameId);
        }

        let bytes = s.as_bytes();
        if bytes.iter().any(|b| !GameId::CHARSET.contains(b)) {
            return Err(InvalidGameId);
        }

        let mut out = [0u8; GameId::LENGTH];
        out.copy_from_slice(bytes);
        Ok(GameId(out))
    }
}

impl Serialize for GameId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GameId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct GameIdVisitor;

        impl<'de> Visitor<'de> for GameIdVisitor {
            type Value = GameId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a {}-character game id", GameId::LENGTH)
            }

            fn visit_str<E>(self, v: &str) -> Result<GameId, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(|_| E::invalid_value(serde::de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(GameIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = GameId::random();
        let text = id.to_string();
        let parsed: GameId = text.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("ABCD".parse::<GameId>().is_err());
        assert!("ABCDEF".parse::<GameId>().is_err());
    }

    #[test]
    fn rejects_out_of_charset_bytes() {
        assert!("abcd!".parse::<GameId>().is_err());
    }

    #[test]
    fn serializes_as_plain_json_string() {
        let id = GameId::random();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
