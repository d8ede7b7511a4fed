// Abstract actions and the translation layer between them and concrete chip
// amounts. The abstract side is a closed enum with a canonical ordering so
// regret and strategy vectors line up across runs; the concrete side is
// whatever the table will actually accept.

use crate::config::MenuMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on the number of actions at any decision node.
pub const MAX_ACTIONS: usize = 8;

/// A discrete strategic choice. `Bet` carries its pot fraction in milli-pots
/// (500 = half pot) so the type stays `Copy + Eq + Hash`. The derived `Ord`
/// is the canonical action order: fold, call, bets ascending, all-in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AbstractAction {
    Fold,
    Call,
    Bet(u16),
    AllIn,
}

impl AbstractAction {
    pub fn bet(fraction: f64) -> AbstractAction {
        debug_assert!(fraction > 0.0);
        AbstractAction::Bet((fraction * 1000.0).round() as u16)
    }

    pub fn fraction(&self) -> Option<f64> {
        match self {
            AbstractAction::Bet(milli) => Some(*milli as f64 / 1000.0),
            _ => None,
        }
    }

    /// Stable byte encoding for infoset history keys.
    pub fn encode(&self) -> u8 {
        match self {
            AbstractAction::Fold => 0,
            AbstractAction::Call => 1,
            AbstractAction::AllIn => 2,
            // Bets occupy 3.. in menu fraction order; callers encode via the
            // node's menu index instead when menus exceed this resolution.
            AbstractAction::Bet(milli) => 3 + (milli / 250).min(250) as u8,
        }
    }
}

impl fmt::Display for AbstractAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AbstractAction::Fold => write!(f, "fold"),
            AbstractAction::Call => write!(f, "call"),
            AbstractAction::Bet(milli) => write!(f, "bet({:.2}p)", *milli as f64 / 1000.0),
            AbstractAction::AllIn => write!(f, "allin"),
        }
    }
}

/// A concrete, table-legal move. Amounts are the chips the player moves with
/// this action: `Call(0)` is a check, a `Bet` facing a bet includes the call
/// portion, and `Bet(stack)` is all-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcreteAction {
    Fold,
    Call(i32),
    Bet(i32),
}

impl ConcreteAction {
    pub fn amount(&self) -> i32 {
        match self {
            ConcreteAction::Fold => 0,
            ConcreteAction::Call(a) | ConcreteAction::Bet(a) => *a,
        }
    }
}

/// Live constraints needed to turn an abstract choice into chips.
#[derive(Debug, Clone, Copy)]
pub struct BetContext {
    /// Pot before the player acts, not counting their pending call.
    pub pot: i32,
    /// Chips the player must add to continue.
    pub to_call: i32,
    /// Minimum raise increment above the call amount.
    pub min_raise: i32,
    /// The player's remaining stack.
    pub stack: i32,
    pub chip_unit: i32,
    /// Sizes at or above this fraction of the stack clamp to all-in.
    pub all_in_fraction: f64,
}

impl BetContext {
    fn round_to_unit(&self, amount: i32) -> i32 {
        let unit = self.chip_unit.max(1);
        let rounded = ((amount as f64 / unit as f64).round() as i32) * unit;
        rounded.max(unit)
    }
}

/// Translates an abstract action into a concrete legal move. Never returns an
/// illegal action: fold with nothing to call becomes a check, undersized
/// raises are bumped to the minimum or degraded, oversized ones clamp to
/// all-in.
pub fn translate(action: AbstractAction, ctx: &BetContext) -> ConcreteAction {
    match action {
        AbstractAction::Fold => {
            if ctx.to_call == 0 {
                ConcreteAction::Call(0)
            } else {
                ConcreteAction::Fold
            }
        }
        AbstractAction::Call => ConcreteAction::Call(ctx.to_call.min(ctx.stack)),
        AbstractAction::AllIn => ConcreteAction::Bet(ctx.stack),
        AbstractAction::Bet(milli) => {
            let fraction = milli as f64 / 1000.0;
            let raw = if ctx.to_call == 0 {
                fraction * ctx.pot as f64
            } else {
                ctx.to_call as f64 + fraction * (ctx.pot + ctx.to_call) as f64
            };
            let mut size = ctx.round_to_unit(raw.round() as i32);

            if size as f64 >= ctx.all_in_fraction * ctx.stack as f64 {
                return ConcreteAction::Bet(ctx.stack);
            }

            let min_size = ctx.to_call + ctx.min_raise;
            if size < min_size {
                if min_size <= ctx.stack {
                    size = min_size;
                } else if ctx.stack > ctx.to_call {
                    // Can't make a full raise; shoving below the minimum is
                    // still legal.
                    return ConcreteAction::Bet(ctx.stack);
                } else {
                    return ConcreteAction::Call(ctx.to_call.min(ctx.stack));
                }
            }
            ConcreteAction::Bet(size.min(ctx.stack))
        }
    }
}

/// Maps a concrete move back to the nearest action in the abstract menu.
/// `translate` then `untranslate` recovers the original menu entry.
pub fn untranslate(
    concrete: ConcreteAction,
    ctx: &BetContext,
    menu: &[AbstractAction],
) -> AbstractAction {
    match concrete {
        ConcreteAction::Fold => AbstractAction::Fold,
        ConcreteAction::Call(_) => AbstractAction::Call,
        ConcreteAction::Bet(size) => {
            if size >= ctx.stack || size as f64 >= ctx.all_in_fraction * ctx.stack as f64 {
                if menu.contains(&AbstractAction::AllIn) {
                    return AbstractAction::AllIn;
                }
            }
            let implied = if ctx.to_call == 0 {
                size as f64 / ctx.pot.max(1) as f64
            } else {
                (size - ctx.to_call) as f64 / (ctx.pot + ctx.to_call).max(1) as f64
            };
            let mut best = AbstractAction::Call;
            let mut best_dist = f64::INFINITY;
            for &action in menu {
                if let Some(fraction) = action.fraction() {
                    let dist = (fraction - implied).abs();
                    if dist < best_dist {
                        best_dist = dist;
                        best = action;
                    }
                }
            }
            if best_dist.is_infinite() {
                // No bet sizes in the menu at all
                if menu.contains(&AbstractAction::AllIn) {
                    AbstractAction::AllIn
                } else {
                    AbstractAction::Call
                }
            } else {
                best
            }
        }
    }
}

/// Resolver bet menus, from conservative to wide. All modes keep all-in.
pub fn resolver_fractions(mode: MenuMode) -> &'static [f64] {
    match mode {
        MenuMode::Tight => &[1.0, -1.0],
        MenuMode::Balanced => &[0.5, 1.0, -1.0],
        MenuMode::Loose => &[0.25, 0.5, 1.0, 2.0, -1.0],
    }
}
