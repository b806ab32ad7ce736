use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A facility-opening project. The open date anchors every template schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub open_date: Option<NaiveDate>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            open_date: None,
        }
    }
}

/// Palette available for people. Everyone is currently created `Blue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PersonColor {
    #[default]
    Blue,
    Indigo,
    Purple,
    Pink,
    Red,
    Orange,
    Amber,
    Yellow,
    Lime,
    Green,
    Emerald,
    Teal,
    Cyan,
    Sky,
}

impl PersonColor {
    pub const ALL: [PersonColor; 14] = [
        PersonColor::Blue,
        PersonColor::Indigo,
        PersonColor::Purple,
        PersonColor::Pink,
        PersonColor::Red,
        PersonColor::Orange,
        PersonColor::Amber,
        PersonColor::Yellow,
        PersonColor::Lime,
        PersonColor::Green,
        PersonColor::Emerald,
        PersonColor::Teal,
        PersonColor::Cyan,
        PersonColor::Sky,
    ];

    /// Stable name used in the `people.color` column.
    pub fn key(self) -> &'static str {
        match self {
            PersonColor::Blue => "blue",
            PersonColor::Indigo => "indigo",
            PersonColor::Purple => "purple",
            PersonColor::Pink => "pink",
            PersonColor::Red => "red",
            PersonColor::Orange => "orange",
            PersonColor::Amber => "amber",
            PersonColor::Yellow => "yellow",
            PersonColor::Lime => "lime",
            PersonColor::Green => "green",
            PersonColor::Emerald => "emerald",
            PersonColor::Teal => "teal",
            PersonColor::Cyan => "cyan",
            PersonColor::Sky => "sky",
        }
    }

    /// Unknown keys fall back to the default color.
    pub fn from_key(key: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.key() == key)
            .unwrap_or_default()
    }
}

/// Someone who can be assigned to tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub display_color: PersonColor,
}

impl Person {
    /// Family name first, as shown in the assignee column.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
            .trim()
            .to_string()
    }

    /// One-character badge for narrow rows.
    pub fn initial(&self) -> String {
        self.last_name
            .chars()
            .next()
            .or_else(|| self.first_name.chars().next())
            .map(String::from)
            .unwrap_or_default()
    }
}
