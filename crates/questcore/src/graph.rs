//! The branching story, compiled in as static data.

use std::fmt;

/// Step the opening story post renders.
pub const ENTRY_STEP: u32 = 1;

/// One selectable option on a story step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceOption {
    pub key: &'static str,
    pub next_id: u32,
}

/// One step of the story. Ending steps carry no options.
#[derive(Debug, Clone, Copy)]
pub struct Choice {
    pub id: u32,
    pub text: &'static str,
    pub is_ending: bool,
    pub options: &'static [ChoiceOption],
}

impl Choice {
    /// `#Key` tags for the post body, empty for ending steps.
    pub fn option_tags(&self) -> String {
        self.options
            .iter()
            .map(|o| format!("#{}", o.key))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Options whose key appears in `hashtags`, compared
    /// case-insensitively. A valid selection matches exactly one.
    pub fn matching_options(&self, hashtags: &[String]) -> Vec<&'static ChoiceOption> {
        self.options
            .iter()
            .filter(|o| hashtags.iter().any(|h| h.eq_ignore_ascii_case(o.key)))
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum GraphError {
    UnknownStep(u32),
    DuplicateStep(u32),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownStep(id) => write!(f, "story step {id} does not exist"),
            GraphError::DuplicateStep(id) => write!(f, "story step {id} is defined twice"),
        }
    }
}

impl std::error::Error for GraphError {}

const STORY: &[Choice] = &[
    Choice {
        id: 1,
        text: "A tree is in the distance, a note on the floor.",
        is_ending: false,
        options: &[
            ChoiceOption { key: "ReadNote", next_id: 2 },
            ChoiceOption { key: "Tree", next_id: 3 },
        ],
    },
    Choice {
        id: 2,
        text: "The note says: \"Hello my lost love.\" The tree beacons, wistfully.",
        is_ending: false,
        options: &[
            ChoiceOption { key: "ReadNote", next_id: 4 },
            ChoiceOption { key: "Tree", next_id: 3 },
        ],
    },
    Choice {
        id: 3,
        text: "You are at the base of the tree. It is big.",
        is_ending: false,
        options: &[
            ChoiceOption { key: "Stare", next_id: 7 },
            ChoiceOption { key: "Listen", next_id: 6 },
        ],
    },
    Choice {
        id: 4,
        text: "The note continues: \"milk, sugar, peanut butter\". THE TREE PLEASE",
        is_ending: false,
        options: &[
            ChoiceOption { key: "ReadNote", next_id: 5 },
            ChoiceOption { key: "Tree", next_id: 3 },
        ],
    },
    Choice {
        id: 5,
        text: "The note continues: \"I am out of things to write about\". The tree is impatient",
        is_ending: false,
        options: &[
            ChoiceOption { key: "Tree", next_id: 3 },
            ChoiceOption { key: "TreeAgain", next_id: 3 },
        ],
    },
    Choice {
        id: 6,
        text: "You lean in close, and the tree whispers... Nothing, it is a tree. #TheEnd",
        is_ending: true,
        options: &[],
    },
    Choice {
        id: 7,
        text: "You stare. So hard. The tree stands there. #TheEnd",
        is_ending: true,
        options: &[],
    },
];

pub fn get_choice(id: u32) -> Result<&'static Choice, GraphError> {
    STORY
        .iter()
        .find(|c| c.id == id)
        .ok_or(GraphError::UnknownStep(id))
}

/// Integrity check run at startup: step ids are unique and every option
/// points at a step that exists.
pub fn validate() -> Result<(), GraphError> {
    for (i, choice) in STORY.iter().enumerate() {
        if STORY[..i].iter().any(|c| c.id == choice.id) {
            return Err(GraphError::DuplicateStep(choice.id));
        }
        for option in choice.options {
            get_choice(option.next_id)?;
        }
    }
    Ok(())
}
