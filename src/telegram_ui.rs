//! Telegram UI components
//!
//! Callback data encoding and the inline keyboards attached to polls,
//! casino menus, generated images and todo listings.

use crate::casino::CasinoSummary;
use crate::images::GeneratedImage;
use crate::todo::Task;
use crate::voting::{option_label, plain_option_label, Poll, PollResults, PollStatus};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

// ============ Callback data ============

/// Button action types for callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Vote { poll_id: i64, option: usize },
    PollRefresh(i64),
    PollResults(i64),
    PollClose(i64),
    CasinoMenu,
    CasinoInfo,
    CasinoCalc,
    CasinoCompare,
    CasinoSelect(String),
    ImageFavorite(i64),
    ImageGallery,
    ImageFavorites,
    TodoDone(i64),
    TodoRefresh,
}

impl CallbackAction {
    /// Encode action as callback data string
    pub fn encode(&self) -> String {
        match self {
            Self::Vote { poll_id, option } => format!("vote:{}:{}", poll_id, option),
            Self::PollRefresh(id) => format!("poll:refresh:{}", id),
            Self::PollResults(id) => format!("poll:results:{}", id),
            Self::PollClose(id) => format!("poll:close:{}", id),
            Self::CasinoMenu => "casino:menu".to_string(),
            Self::CasinoInfo => "casino:info".to_string(),
            Self::CasinoCalc => "casino:calc".to_string(),
            Self::CasinoCompare => "casino:compare".to_string(),
            Self::CasinoSelect(name) => format!("casino:select:{}", name),
            Self::ImageFavorite(id) => format!("img:fav:{}", id),
            Self::ImageGallery => "img:gallery".to_string(),
            Self::ImageFavorites => "img:favs".to_string(),
            Self::TodoDone(id) => format!("todo:done:{}", id),
            Self::TodoRefresh => "todo:refresh".to_string(),
        }
    }

    /// Decode callback data string to action
    pub fn decode(data: &str) -> Option<Self> {
        let parts: Vec<&str> = data.splitn(3, ':').collect();
        match parts.as_slice() {
            ["vote", poll, option] => Some(Self::Vote {
                poll_id: poll.parse().ok()?,
                option: option.parse().ok()?,
            }),
            ["poll", "refresh", id] => Some(Self::PollRefresh(id.parse().ok()?)),
            ["poll", "results", id] => Some(Self::PollResults(id.parse().ok()?)),
            ["poll", "close", id] => Some(Self::PollClose(id.parse().ok()?)),
            ["casino", "menu"] => Some(Self::CasinoMenu),
            ["casino", "info"] => Some(Self::CasinoInfo),
            ["casino", "calc"] => Some(Self::CasinoCalc),
            ["casino", "compare"] => Some(Self::CasinoCompare),
            ["casino", "select", name] if !name.is_empty() => Some(Self::CasinoSelect(name.to_string())),
            ["img", "fav", id] => Some(Self::ImageFavorite(id.parse().ok()?)),
            ["img", "gallery"] => Some(Self::ImageGallery),
            ["img", "favs"] => Some(Self::ImageFavorites),
            ["todo", "done", id] => Some(Self::TodoDone(id.parse().ok()?)),
            ["todo", "refresh"] => Some(Self::TodoRefresh),
            _ => None,
        }
    }
}

fn button(label: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label.into(), action.encode())
}

// ============ Keyboards ============

/// One button per option with live counts (plain labels for a running quiz),
/// then refresh/results/close. Closed polls only get the results button.
pub fn poll_keyboard(poll: &Poll, results: &PollResults, chosen: &[usize]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();

    if poll.status == PollStatus::Active {
        let show_counts = poll.results_visible();
        for (i, option) in poll.options.iter().enumerate() {
            let is_chosen = chosen.contains(&i);
            let label = if show_counts {
                let count = results.counts.get(i).copied().unwrap_or(0);
                option_label(option, count, results.total_votes, is_chosen)
            } else {
                plain_option_label(option, is_chosen)
            };
            rows.push(vec![button(
                label,
                CallbackAction::Vote {
                    poll_id: poll.id,
                    option: i,
                },
            )]);
        }
        rows.push(vec![
            button("🔄 Refresh", CallbackAction::PollRefresh(poll.id)),
            button("📊 Results", CallbackAction::PollResults(poll.id)),
            button("🔒 Close", CallbackAction::PollClose(poll.id)),
        ]);
    } else {
        rows.push(vec![button("📊 Results", CallbackAction::PollResults(poll.id))]);
    }

    InlineKeyboardMarkup::new(rows)
}

pub fn casino_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("📊 Casino Information", CallbackAction::CasinoInfo)],
        vec![button("💰 Bonus Calculator", CallbackAction::CasinoCalc)],
        vec![button("🎯 Compare Casinos", CallbackAction::CasinoCompare)],
    ])
}

/// Two casinos per row plus a way back
pub fn casino_select_keyboard(casinos: &[CasinoSummary]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = casinos
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|c| button(c.name.clone(), CallbackAction::CasinoSelect(c.name.clone())))
                .collect()
        })
        .collect();
    rows.push(vec![button("🔄 Back to Menu", CallbackAction::CasinoMenu)]);
    InlineKeyboardMarkup::new(rows)
}

pub fn back_to_casino_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("🔄 Back to Menu", CallbackAction::CasinoMenu)]])
}

pub fn image_keyboard(image: &GeneratedImage) -> InlineKeyboardMarkup {
    let label = if image.is_favorite { "★ Unfavorite" } else { "⭐ Favorite" };
    InlineKeyboardMarkup::new(vec![vec![
        button(label, CallbackAction::ImageFavorite(image.id)),
        button("🖼️ Gallery", CallbackAction::ImageGallery),
    ]])
}

pub fn gallery_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("⭐ View Favorites", CallbackAction::ImageFavorites),
        button("🔄 Refresh", CallbackAction::ImageGallery),
    ]])
}

/// "Done" buttons for the first open tasks
pub fn todo_keyboard(tasks: &[Task]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = tasks
        .iter()
        .filter(|t| t.status != crate::todo::TaskStatus::Completed)
        .take(6)
        .map(|t| t.id)
        .collect::<Vec<_>>()
        .chunks(3)
        .map(|ids| {
            ids.iter()
                .map(|id| button(format!("✅ #{}", id), CallbackAction::TodoDone(*id)))
                .collect()
        })
        .collect();
    rows.push(vec![button("🔄 Refresh", CallbackAction::TodoRefresh)]);
    InlineKeyboardMarkup::new(rows)
}
