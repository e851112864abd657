//! Console command parsing

use anyhow::{bail, Context};
use gavel_types::{Amount, ConnectionId, ItemId};

pub const HELP: &str = "\
houses                        connect to every house the bank knows
list                          live auctions at connected houses
bid <house> <item> <amount>   place a bid
pay <house> <item>            pay for a won item
balance                       balance and blocked funds
won                           items won so far
exit                          leave, unless still leading or owing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Houses,
    List,
    Bid {
        house_id: ConnectionId,
        item_id: ItemId,
        amount: Amount,
    },
    Pay {
        house_id: ConnectionId,
        item_id: ItemId,
    },
    Balance,
    Won,
    Help,
    Exit,
}

impl Command {
    /// Parse one console line; `None` for a blank line
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, rest)) = words.split_first() else {
            return Ok(None);
        };

        let command = match (verb, rest) {
            ("houses", []) => Command::Houses,
            ("list", []) => Command::List,
            ("bid", [house, item, amount]) => Command::Bid {
                house_id: ConnectionId::new(number(house, "house id")?),
                item_id: ItemId::new(number(item, "item id")?),
                amount: Amount::new(number(amount, "amount")?),
            },
            ("pay", [house, item]) => Command::Pay {
                house_id: ConnectionId::new(number(house, "house id")?),
                item_id: ItemId::new(number(item, "item id")?),
            },
            ("balance", []) => Command::Balance,
            ("won", []) => Command::Won,
            ("help", _) => Command::Help,
            ("exit" | "quit", []) => Command::Exit,
            _ => bail!("unrecognised command '{}', type 'help'", line.trim()),
        };
        Ok(Some(command))
    }
}

/// Accepts plain numbers as well as the `conn_3` / `item_7` display forms
fn number<T: std::str::FromStr>(word: &str, what: &str) -> anyhow::Result<T> {
    let digits = word.rsplit('_').next().unwrap_or(word);
    digits
        .parse()
        .ok()
        .with_context(|| format!("'{}' is not a valid {}", word, what))
}
