// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Binding resolution: `(channel, account, peer, guild/team)` → agent.
//!
//! Matching order is strict — peer, then guild, then team, then account,
//! then channel default, then the ambient default agent — so an operator
//! can override a channel default for one noisy peer without touching the
//! rest of the transport's routing.

use serde::{Deserialize, Serialize};

use relay_channels::{IncomingMessage, PeerId};

/// Constraint side of a binding.  `channel` is mandatory; the remaining
/// fields narrow the match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingMatch {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

/// One routing rule.  Lower `priority` wins within a tier; ties fall back to
/// insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub binding_id: String,
    pub agent_id: String,
    #[serde(rename = "match")]
    pub match_spec: BindingMatch,
    #[serde(default)]
    pub priority: i32,
}

/// The routing-relevant slice of an inbound message.
#[derive(Debug, Clone, Default)]
pub struct RouteInput {
    pub channel: String,
    pub account_id: Option<String>,
    pub peer: Option<PeerId>,
    pub guild_id: Option<String>,
    pub team_id: Option<String>,
}

impl From<&IncomingMessage> for RouteInput {
    fn from(msg: &IncomingMessage) -> Self {
        Self {
            channel: msg.channel.clone(),
            account_id: msg.account_id.clone(),
            peer: msg.peer.clone(),
            guild_id: msg.guild_id.clone(),
            team_id: msg.team_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Peer,
    Guild,
    Team,
    Account,
    ChannelDefault,
    Default,
}

#[derive(Debug, Clone)]
pub struct RouteResolution {
    pub agent_id: String,
    pub matched_by: MatchedBy,
}

/// The most specific constraint a binding carries, which decides the tier it
/// competes in.
fn binding_tier(b: &Binding) -> MatchedBy {
    let m = &b.match_spec;
    if m.peer.is_some() {
        MatchedBy::Peer
    } else if m.guild_id.is_some() {
        MatchedBy::Guild
    } else if m.team_id.is_some() {
        MatchedBy::Team
    } else if m.account_id.as_deref().map_or(false, |a| a != "*") {
        MatchedBy::Account
    } else {
        MatchedBy::ChannelDefault
    }
}

pub struct Router {
    /// Sorted by priority ascending; the sort is stable so equal priorities
    /// keep their insertion order.
    bindings: Vec<Binding>,
}

impl Router {
    pub fn new(mut bindings: Vec<Binding>) -> Self {
        bindings.sort_by_key(|b| b.priority);
        Self { bindings }
    }

    /// Resolve `input` to an agent.  A routing miss is not an error; it
    /// falls back to `default_agent_id`.
    pub fn resolve(&self, input: &RouteInput, default_agent_id: &str) -> RouteResolution {
        const TIERS: [MatchedBy; 5] = [
            MatchedBy::Peer,
            MatchedBy::Guild,
            MatchedBy::Team,
            MatchedBy::Account,
            MatchedBy::ChannelDefault,
        ];
        for tier in TIERS {
            let hit = self
                .bindings
                .iter()
                .filter(|b| binding_tier(b) == tier && b.match_spec.channel == input.channel)
                .find(|b| tier_matches(b, tier, input));
            if let Some(b) = hit {
                return RouteResolution { agent_id: b.agent_id.clone(), matched_by: tier };
            }
        }
        RouteResolution {
            agent_id: default_agent_id.to_string(),
            matched_by: MatchedBy::Default,
        }
    }
}

fn tier_matches(b: &Binding, tier: MatchedBy, input: &RouteInput) -> bool {
    let m = &b.match_spec;
    match tier {
        MatchedBy::Peer => match (&m.peer, &input.peer) {
            (Some(want), Some(have)) => want.kind == have.kind && want.id == have.id,
            _ => false,
        },
        MatchedBy::Guild => {
            m.guild_id.is_some() && m.guild_id == input.guild_id
        }
        MatchedBy::Team => m.team_id.is_some() && m.team_id == input.team_id,
        MatchedBy::Account => {
            m.account_id.is_some() && m.account_id == input.account_id
        }
        MatchedBy::ChannelDefault => true,
        MatchedBy::Default => true,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(id: &str, agent: &str, priority: i32, m: BindingMatch) -> Binding {
        Binding {
            binding_id: id.into(),
            agent_id: agent.into(),
            match_spec: m,
            priority,
        }
    }

    fn peer(kind: &str, id: &str) -> Option<PeerId> {
        Some(PeerId { kind: kind.into(), id: id.into() })
    }

    fn input(channel: &str) -> RouteInput {
        RouteInput { channel: channel.into(), ..Default::default() }
    }

    #[test]
    fn falls_back_to_default_with_no_bindings() {
        let r = Router::new(vec![]);
        let res = r.resolve(&input("telegram"), "default");
        assert_eq!(res.agent_id, "default");
        assert_eq!(res.matched_by, MatchedBy::Default);
    }

    #[test]
    fn peer_binding_beats_channel_default() {
        let r = Router::new(vec![
            binding("b1", "channel-agent", 0, BindingMatch {
                channel: "telegram".into(),
                ..Default::default()
            }),
            binding("b2", "peer-agent", 10, BindingMatch {
                channel: "telegram".into(),
                peer: peer("user", "42"),
                ..Default::default()
            }),
        ]);
        let mut inp = input("telegram");
        inp.peer = peer("user", "42");
        let res = r.resolve(&inp, "default");
        assert_eq!(res.agent_id, "peer-agent");
        assert_eq!(res.matched_by, MatchedBy::Peer);
    }

    #[test]
    fn peer_match_requires_kind_and_id() {
        let r = Router::new(vec![binding("b", "peer-agent", 0, BindingMatch {
            channel: "telegram".into(),
            peer: peer("group", "42"),
            ..Default::default()
        })]);
        let mut inp = input("telegram");
        inp.peer = peer("user", "42");
        assert_eq!(r.resolve(&inp, "default").matched_by, MatchedBy::Default);
    }

    #[test]
    fn guild_beats_team_and_account() {
        let r = Router::new(vec![
            binding("b1", "account-agent", 0, BindingMatch {
                channel: "discord".into(),
                account_id: Some("acct".into()),
                ..Default::default()
            }),
            binding("b2", "team-agent", 0, BindingMatch {
                channel: "discord".into(),
                team_id: Some("t1".into()),
                ..Default::default()
            }),
            binding("b3", "guild-agent", 0, BindingMatch {
                channel: "discord".into(),
                guild_id: Some("g1".into()),
                ..Default::default()
            }),
        ]);
        let inp = RouteInput {
            channel: "discord".into(),
            account_id: Some("acct".into()),
            guild_id: Some("g1".into()),
            team_id: Some("t1".into()),
            ..Default::default()
        };
        let res = r.resolve(&inp, "default");
        assert_eq!(res.agent_id, "guild-agent");
        assert_eq!(res.matched_by, MatchedBy::Guild);
    }

    #[test]
    fn account_tier_requires_bare_account_binding() {
        let r = Router::new(vec![binding("b", "acct-agent", 0, BindingMatch {
            channel: "slack".into(),
            account_id: Some("work".into()),
            ..Default::default()
        })]);
        let inp = RouteInput {
            channel: "slack".into(),
            account_id: Some("work".into()),
            ..Default::default()
        };
        let res = r.resolve(&inp, "default");
        assert_eq!(res.matched_by, MatchedBy::Account);
    }

    #[test]
    fn wildcard_account_is_channel_default() {
        let r = Router::new(vec![binding("b", "chan-agent", 0, BindingMatch {
            channel: "irc".into(),
            account_id: Some("*".into()),
            ..Default::default()
        })]);
        let res = r.resolve(&input("irc"), "default");
        assert_eq!(res.agent_id, "chan-agent");
        assert_eq!(res.matched_by, MatchedBy::ChannelDefault);
    }

    #[test]
    fn other_channels_bindings_never_match() {
        let r = Router::new(vec![binding("b", "tg-agent", 0, BindingMatch {
            channel: "telegram".into(),
            ..Default::default()
        })]);
        let res = r.resolve(&input("discord"), "default");
        assert_eq!(res.matched_by, MatchedBy::Default);
    }

    #[test]
    fn lowest_priority_number_wins_within_tier() {
        let r = Router::new(vec![
            binding("b1", "late", 5, BindingMatch {
                channel: "telegram".into(),
                ..Default::default()
            }),
            binding("b2", "early", 1, BindingMatch {
                channel: "telegram".into(),
                ..Default::default()
            }),
        ]);
        assert_eq!(r.resolve(&input("telegram"), "default").agent_id, "early");
    }

    #[test]
    fn equal_priority_ties_break_by_insertion_order() {
        let r = Router::new(vec![
            binding("b1", "first", 3, BindingMatch {
                channel: "telegram".into(),
                ..Default::default()
            }),
            binding("b2", "second", 3, BindingMatch {
                channel: "telegram".into(),
                ..Default::default()
            }),
        ]);
        assert_eq!(r.resolve(&input("telegram"), "default").agent_id, "first");
    }

    #[test]
    fn resolution_is_deterministic() {
        let bindings = vec![
            binding("b1", "a", 2, BindingMatch {
                channel: "telegram".into(),
                peer: peer("user", "1"),
                ..Default::default()
            }),
            binding("b2", "b", 1, BindingMatch {
                channel: "telegram".into(),
                ..Default::default()
            }),
        ];
        let r1 = Router::new(bindings.clone());
        let r2 = Router::new(bindings);
        let mut inp = input("telegram");
        inp.peer = peer("user", "1");
        for _ in 0..10 {
            assert_eq!(r1.resolve(&inp, "d").agent_id, r2.resolve(&inp, "d").agent_id);
        }
    }
}
