use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const RANKED_SOLO_QUEUE_ID: i64 = 420;
/// Only matches from this exact client snapshot are collected; mixing patches
/// would poison the training set.
pub const EXPECTED_GAME_VERSION: &str = "15.1.648.2343";
pub const NO_INFO: &str = "NO_INFO";
pub const NO_BAN: &str = "NO_BAN";
pub const BLUE_TEAM_ID: i64 = 100;
pub const RED_TEAM_ID: i64 = 200;

const PARTICIPANTS_PER_TEAM: usize = 5;
const BAN_SLOTS_PER_TEAM: usize = 5;
const BOT_LANE: &str = "BOTTOM";

/// One positional entry of a flattened match. The list is consumed
/// positionally by training code, so serialization stays untagged: a number
/// for the id, a 3-element array per player, a bare string per ban slot and a
/// bare bool for the win flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordEntry {
    MatchId(i64),
    Player(String, String, String),
    Ban(String),
    Win(bool),
}

pub type MatchRecord = Vec<RecordEntry>;

/// Hard filter: ranked solo queue on the expected game version, nothing else.
pub fn passes_collection_filter(match_json: &Value) -> bool {
    let Some(info) = match_json.get("info") else {
        return false;
    };

    let queue_id = info.get("queueId").and_then(|value| value.as_i64());
    let version = info.get("gameVersion").and_then(|value| value.as_str());

    queue_id == Some(RANKED_SOLO_QUEUE_ID) && version == Some(EXPECTED_GAME_VERSION)
}

/// Lane label for one participant. Bottom-lane participants get their role
/// instead (CARRY vs SUPPORT is the meaningful split there); absent lane data
/// falls back to the NO_INFO sentinel.
pub fn lane_label(participant: &Value) -> String {
    match participant.get("lane").and_then(|value| value.as_str()) {
        Some(BOT_LANE) => participant
            .get("role")
            .and_then(|value| value.as_str())
            .unwrap_or(NO_INFO)
            .to_string(),
        Some(lane) if !lane.is_empty() => lane.to_string(),
        _ => NO_INFO.to_string(),
    }
}

/// Flattens a filtered match into its positional record: per team five
/// (lane, champion, tier) triples then five ban slots, blue side first, and
/// the blue-side win flag last. 21 entries, or 22 with a leading match id.
///
/// The solo-queue rank is looked up per participant through `solo_rank` so
/// the caller decides how lookups hit the API (and how key refresh applies).
pub fn build_record(
    match_json: &Value,
    match_id: Option<i64>,
    champion_names: &HashMap<i64, String>,
    solo_rank: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<MatchRecord> {
    let info = match_json
        .get("info")
        .ok_or_else(|| anyhow!("match has no info block"))?;
    let participants = info
        .get("participants")
        .and_then(|list| list.as_array())
        .ok_or_else(|| anyhow!("match has no participant list"))?;
    let teams = info
        .get("teams")
        .and_then(|list| list.as_array())
        .ok_or_else(|| anyhow!("match has no team list"))?;

    let mut record: MatchRecord = Vec::with_capacity(22);
    if let Some(id) = match_id {
        record.push(RecordEntry::MatchId(id));
    }

    for team_id in [BLUE_TEAM_ID, RED_TEAM_ID] {
        let side: Vec<&Value> = participants
            .iter()
            .filter(|p| p.get("teamId").and_then(|value| value.as_i64()) == Some(team_id))
            .collect();
        if side.len() != PARTICIPANTS_PER_TEAM {
            return Err(anyhow!(
                "team {} has {} participants, expected {}",
                team_id,
                side.len(),
                PARTICIPANTS_PER_TEAM
            ));
        }

        for participant in side {
            let lane = lane_label(participant);
            let champion = participant
                .get("championName")
                .and_then(|value| value.as_str())
                .ok_or_else(|| anyhow!("participant has no champion name"))?;
            let puuid = participant
                .get("puuid")
                .and_then(|value| value.as_str())
                .ok_or_else(|| anyhow!("participant has no puuid"))?;
            let tier = solo_rank(puuid)?;

            record.push(RecordEntry::Player(lane, champion.to_string(), tier));
        }

        let team = team_block(teams, team_id)?;
        for champion_id in team_ban_slots(team) {
            record.push(RecordEntry::Ban(ban_label(champion_id, champion_names)));
        }
    }

    let blue = team_block(teams, BLUE_TEAM_ID)?;
    let win = blue
        .get("win")
        .and_then(|value| value.as_bool())
        .ok_or_else(|| anyhow!("blue team has no win flag"))?;
    record.push(RecordEntry::Win(win));

    Ok(record)
}

fn team_block(teams: &[Value], team_id: i64) -> Result<&Value> {
    teams
        .iter()
        .find(|team| team.get("teamId").and_then(|value| value.as_i64()) == Some(team_id))
        .ok_or_else(|| anyhow!("team {} block missing", team_id))
}

/// Always five slots per team, in pick-turn order. Short or empty ban lists
/// are padded so slot positions survive; -1 marks an empty slot.
fn team_ban_slots(team: &Value) -> [i64; BAN_SLOTS_PER_TEAM] {
    let mut slots = [-1i64; BAN_SLOTS_PER_TEAM];

    let Some(bans) = team.get("bans").and_then(|list| list.as_array()) else {
        return slots;
    };

    let mut ordered: Vec<(i64, i64)> = bans
        .iter()
        .map(|ban| {
            (
                ban.get("pickTurn")
                    .and_then(|value| value.as_i64())
                    .unwrap_or(i64::MAX),
                ban.get("championId")
                    .and_then(|value| value.as_i64())
                    .unwrap_or(-1),
            )
        })
        .collect();
    ordered.sort_by_key(|(pick_turn, _)| *pick_turn);

    for (slot, (_, champion_id)) in ordered.into_iter().take(BAN_SLOTS_PER_TEAM).enumerate() {
        slots[slot] = champion_id;
    }

    slots
}

fn ban_label(champion_id: i64, champion_names: &HashMap<i64, String>) -> String {
    if champion_id < 0 {
        return NO_BAN.to_string();
    }

    champion_names
        .get(&champion_id)
        .cloned()
        .unwrap_or_else(|| champion_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn participant(team_id: i64, index: usize, lane: &str, role: &str, champion: &str) -> Value {
        json!({
            "teamId": team_id,
            "lane": lane,
            "role": role,
            "championName": champion,
            "puuid": format!("puuid-{}-{}", team_id, index),
        })
    }

    fn side(team_id: i64) -> Vec<Value> {
        vec![
            participant(team_id, 0, "TOP", "SOLO", "Aatrox"),
            participant(team_id, 1, "JUNGLE", "NONE", "LeeSin"),
            participant(team_id, 2, "MIDDLE", "SOLO", "Ahri"),
            participant(team_id, 3, "BOTTOM", "CARRY", "Jinx"),
            participant(team_id, 4, "BOTTOM", "SUPPORT", "Thresh"),
        ]
    }

    fn full_bans(first_champion: i64) -> Vec<Value> {
        (0..5)
            .map(|turn| json!({ "championId": first_champion + turn, "pickTurn": turn + 1 }))
            .collect::<Vec<_>>()
    }

    fn sample_match() -> Value {
        let mut participants = side(BLUE_TEAM_ID);
        participants.extend(side(RED_TEAM_ID));

        json!({
            "info": {
                "gameVersion": EXPECTED_GAME_VERSION,
                "queueId": RANKED_SOLO_QUEUE_ID,
                "participants": participants,
                "teams": [
                    { "teamId": BLUE_TEAM_ID, "win": true, "bans": full_bans(10) },
                    { "teamId": RED_TEAM_ID, "win": false, "bans": full_bans(20) },
                ],
            },
        })
    }

    fn stub_rank(_puuid: &str) -> Result<String> {
        Ok("GOLD IV".to_string())
    }

    #[test]
    fn filter_rejects_other_queues() {
        let mut m = sample_match();
        m["info"]["queueId"] = json!(440);

        assert!(!passes_collection_filter(&m));
    }

    #[test]
    fn filter_rejects_other_game_versions() {
        let mut m = sample_match();
        m["info"]["gameVersion"] = json!("15.2.100.1000");

        assert!(!passes_collection_filter(&m));
    }

    #[test]
    fn filter_accepts_the_expected_snapshot() {
        assert!(passes_collection_filter(&sample_match()));
    }

    #[test]
    fn record_has_twenty_one_entries() {
        let record =
            build_record(&sample_match(), None, &HashMap::new(), &mut stub_rank).unwrap();

        assert_eq!(record.len(), 21);
        assert_eq!(record[20], RecordEntry::Win(true));
    }

    #[test]
    fn leading_match_id_makes_twenty_two_entries() {
        let record =
            build_record(&sample_match(), Some(4242), &HashMap::new(), &mut stub_rank).unwrap();

        assert_eq!(record.len(), 22);
        assert_eq!(record[0], RecordEntry::MatchId(4242));
        assert_eq!(record[21], RecordEntry::Win(true));
    }

    #[test]
    fn blue_players_come_before_blue_bans_then_red() {
        let names: HashMap<i64, String> =
            (10..30).map(|id| (id, format!("Champ{}", id))).collect();
        let record = build_record(&sample_match(), None, &names, &mut stub_rank).unwrap();

        assert!(matches!(record[0], RecordEntry::Player(..)));
        assert_eq!(record[5], RecordEntry::Ban("Champ10".to_string()));
        assert!(matches!(record[10], RecordEntry::Player(..)));
        assert_eq!(record[15], RecordEntry::Ban("Champ20".to_string()));
    }

    #[test]
    fn bottom_lane_is_replaced_by_role() {
        let record =
            build_record(&sample_match(), None, &HashMap::new(), &mut stub_rank).unwrap();

        assert_eq!(
            record[3],
            RecordEntry::Player(
                "CARRY".to_string(),
                "Jinx".to_string(),
                "GOLD IV".to_string()
            )
        );
        assert_eq!(
            record[4],
            RecordEntry::Player(
                "SUPPORT".to_string(),
                "Thresh".to_string(),
                "GOLD IV".to_string()
            )
        );
    }

    #[test]
    fn absent_lane_data_yields_the_no_info_sentinel() {
        assert_eq!(lane_label(&json!({})), NO_INFO);
        assert_eq!(lane_label(&json!({ "lane": "" })), NO_INFO);
        assert_eq!(lane_label(&json!({ "lane": "BOTTOM" })), NO_INFO);
        assert_eq!(lane_label(&json!({ "lane": "TOP" })), "TOP");
    }

    #[test]
    fn short_ban_lists_are_padded_with_the_sentinel() {
        let mut m = sample_match();
        m["info"]["teams"][0]["bans"] = json!([
            { "championId": 10, "pickTurn": 1 },
            { "championId": -1, "pickTurn": 2 },
        ]);

        let record = build_record(&m, None, &HashMap::new(), &mut stub_rank).unwrap();

        assert_eq!(record[5], RecordEntry::Ban("10".to_string()));
        for slot in 6..10 {
            assert_eq!(record[slot], RecordEntry::Ban(NO_BAN.to_string()));
        }
    }

    #[test]
    fn ban_slots_follow_pick_turn_order() {
        let mut m = sample_match();
        m["info"]["teams"][0]["bans"] = json!([
            { "championId": 3, "pickTurn": 3 },
            { "championId": 1, "pickTurn": 1 },
            { "championId": 2, "pickTurn": 2 },
            { "championId": 5, "pickTurn": 5 },
            { "championId": 4, "pickTurn": 4 },
        ]);

        let record = build_record(&m, None, &HashMap::new(), &mut stub_rank).unwrap();

        for (slot, expected) in (5..10).zip(1..=5) {
            assert_eq!(record[slot], RecordEntry::Ban(expected.to_string()));
        }
    }

    #[test]
    fn unknown_ban_ids_fall_back_to_the_numeric_id() {
        let names = HashMap::from([(10i64, "Kayle".to_string())]);

        assert_eq!(ban_label(10, &names), "Kayle");
        assert_eq!(ban_label(99, &names), "99");
        assert_eq!(ban_label(-1, &names), NO_BAN);
    }

    #[test]
    fn rank_lookup_failure_discards_the_whole_match() {
        let mut failing = |_puuid: &str| -> Result<String> { Err(anyhow!("no ranked entry")) };

        assert!(build_record(&sample_match(), None, &HashMap::new(), &mut failing).is_err());
    }

    #[test]
    fn entries_serialize_untagged() {
        let record: MatchRecord = vec![
            RecordEntry::MatchId(7),
            RecordEntry::Player("TOP".to_string(), "Aatrox".to_string(), "GOLD IV".to_string()),
            RecordEntry::Ban(NO_BAN.to_string()),
            RecordEntry::Win(false),
        ];

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!([7, ["TOP", "Aatrox", "GOLD IV"], "NO_BAN", false]));

        let back: MatchRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
