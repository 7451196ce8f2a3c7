//! Auto-tagging for guide chunks.
//!
//! Derives a tag set and structured entity mentions from chunk text using
//! static keyword/regex tables for Limbus Company content. Pure pattern
//! matching: no external calls, no learning. All alternations are compiled
//! once at construction and reused across chunks.

use std::collections::BTreeSet;

use regex::Regex;

use super::store::{Chunk, Entities};

// ============================================================================
// Keyword Tables
// ============================================================================

/// Status effects (English and Chinese trigger keywords).
const STATUS_KEYWORDS: &[(&str, &[&str])] = &[
    ("burn", &["burn", "燃烧", "烧伤", "burning"]),
    ("bleed", &["bleed", "流血", "出血", "bleeding"]),
    ("tremor", &["tremor", "震颤", "颤抖"]),
    ("rupture", &["rupture", "破裂", "爆裂"]),
    ("sinking", &["sinking", "沉沦", "下沉"]),
    ("poise", &["poise", "蓄力", "架势", "姿态"]),
    ("charge", &["charge", "充能"]),
];

/// Game modes / content types.
const MODE_KEYWORDS: &[(&str, &[&str])] = &[
    ("主线", &["主线", "章节", "story", "main story"]),
    ("镜牢", &["镜牢", "mirror dungeon", "md", "镜像迷宫"]),
    ("铁道", &["铁道", "railway", "rr", "refraction railway", "折射铁道"]),
    ("活动", &["活动", "event", "限时"]),
    ("异想体", &["异想体", "abnormality", "abno"]),
];

/// Combat mechanics.
const MECHANICS_KEYWORDS: &[(&str, &[&str])] = &[
    ("拼点/冲突", &["拼点", "clash", "冲突", "硬币", "coin", "速度", "speed"]),
    (
        "罪孽/资源",
        &[
            "罪孽", "sin", "资源", "resource", "共鸣", "resonance", "暴食", "色欲", "懒惰",
            "暴怒", "忧郁", "傲慢", "嫉妒", "gluttony", "lust", "sloth", "wrath", "gloom",
            "pride", "envy",
        ],
    ),
    (
        "属性/伤害类型",
        &[
            "斩击", "slash", "穿刺", "pierce", "钝击", "blunt", "抗性", "resistance", "弱点",
            "weakness", "伤害类型",
        ],
    ),
    ("精神/混乱", &["精神", "sanity", "混乱", "panic", "sp", "理智"]),
    ("技能与被动", &["技能", "skill", "被动", "passive", "主动", "active"]),
    ("EGO机制", &["ego", "侵蚀", "corrosion", "腐蚀", "erosion"]),
    ("结算顺序", &["结算", "回合", "turn", "顺序", "order", "流程"]),
];

/// Identity and role categories.
const IDENTITY_KEYWORDS: &[(&str, &[&str])] = &[
    ("人格", &["人格", "identity", "id", "000", "00", "三星", "二星", "一星"]),
    ("定位:输出", &["输出", "dps", "damage dealer", "伤害"]),
    ("定位:坦克", &["坦克", "tank", "肉盾", "承伤"]),
    ("定位:辅助", &["辅助", "support", "buff", "增益"]),
    ("定位:控场", &["控场", "control", "cc", "控制"]),
];

/// Team building.
const TEAM_KEYWORDS: &[(&str, &[&str])] = &[
    ("配队/阵容", &["配队", "阵容", "team", "lineup", "编队", "组队"]),
    ("轴/回合规划", &["轴", "回合规划", "rotation", "循环"]),
    ("Boss打法", &["boss", "首领", "打法", "strategy", "攻略"]),
    ("刷取/效率", &["刷", "效率", "farm", "grinding"]),
];

/// Sinner name variants, matched as one alternation.
const SINNER_NAMES: &[&str] = &[
    "yi sang", "以撒", "异想",
    "faust", "浮士德",
    "don quixote", "堂吉诃德", "唐吉诃德",
    "ryoshu", "良秀", "龙秀",
    "meursault", "默尔索",
    "hong lu", "洪鹿", "红鹿",
    "heathcliff", "希斯克利夫",
    "ishmael", "以实玛利",
    "rodion", "罗季翁", "罗佳",
    "sinclair", "辛克莱",
    "outis", "奥提斯",
    "gregor", "格里高尔",
];

/// Variant -> canonical Chinese display name.
const SINNER_CANONICAL: &[(&str, &str)] = &[
    ("yi sang", "以撒"),
    ("以撒", "以撒"),
    ("异想", "以撒"),
    ("faust", "浮士德"),
    ("浮士德", "浮士德"),
    ("don quixote", "堂吉诃德"),
    ("堂吉诃德", "堂吉诃德"),
    ("唐吉诃德", "堂吉诃德"),
    ("ryoshu", "良秀"),
    ("良秀", "良秀"),
    ("龙秀", "良秀"),
    ("meursault", "默尔索"),
    ("默尔索", "默尔索"),
    ("hong lu", "洪鹿"),
    ("洪鹿", "洪鹿"),
    ("红鹿", "洪鹿"),
    ("heathcliff", "希斯克利夫"),
    ("希斯克利夫", "希斯克利夫"),
    ("ishmael", "以实玛利"),
    ("以实玛利", "以实玛利"),
    ("rodion", "罗季翁"),
    ("罗季翁", "罗季翁"),
    ("罗佳", "罗季翁"),
    ("sinclair", "辛克莱"),
    ("辛克莱", "辛克莱"),
    ("outis", "奥提斯"),
    ("奥提斯", "奥提斯"),
    ("gregor", "格里高尔"),
    ("格里高尔", "格里高尔"),
];

// ============================================================================
// Tagger
// ============================================================================

/// Compiled keyword matcher for one category.
struct CategoryPattern {
    label: &'static str,
    pattern: Regex,
}

fn compile_table(table: &[(&'static str, &[&str])]) -> Vec<CategoryPattern> {
    table
        .iter()
        .map(|(label, keywords)| {
            let alternation = keywords
                .iter()
                .map(|kw| regex::escape(kw))
                .collect::<Vec<_>>()
                .join("|");
            CategoryPattern {
                label,
                pattern: Regex::new(&format!("(?i){}", alternation)).unwrap(),
            }
        })
        .collect()
}

/// Keyword/regex based auto-tagger.
pub struct Tagger {
    statuses: Vec<CategoryPattern>,
    modes: Vec<CategoryPattern>,
    mechanics: Vec<CategoryPattern>,
    identities: Vec<CategoryPattern>,
    teams: Vec<CategoryPattern>,
    sinner_re: Regex,
    ego_mention_re: Regex,
    ego_name_re: Regex,
    identity_name_re: Regex,
    beginner_re: Regex,
    version_re: Regex,
    resource_re: Regex,
    faq_re: Regex,
}

impl Default for Tagger {
    fn default() -> Self {
        Self::new()
    }
}

impl Tagger {
    pub fn new() -> Self {
        let sinner_alternation = SINNER_NAMES
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");

        Self {
            statuses: compile_table(STATUS_KEYWORDS),
            modes: compile_table(MODE_KEYWORDS),
            mechanics: compile_table(MECHANICS_KEYWORDS),
            identities: compile_table(IDENTITY_KEYWORDS),
            teams: compile_table(TEAM_KEYWORDS),
            sinner_re: Regex::new(&format!("(?i){}", sinner_alternation)).unwrap(),
            ego_mention_re: Regex::new(r"(?i)ego|e\.g\.o").unwrap(),
            ego_name_re: Regex::new(r"(?i)ego[：:]\s*([^\s,，。]+)").unwrap(),
            identity_name_re: Regex::new(r"人格[：:]\s*([^\s,，。]+)").unwrap(),
            beginner_re: Regex::new(r"新手|入门|基础|教程").unwrap(),
            version_re: Regex::new(r"(?i)版本|更新|patch|改动").unwrap(),
            resource_re: Regex::new(r"资源|养成|材料|升级").unwrap(),
            faq_re: Regex::new(r"(?i)FAQ|问答|Q\s*[：:]|A\s*[：:]").unwrap(),
        }
    }

    /// Tag a piece of text.
    ///
    /// Every category is evaluated independently and additively. Tags have
    /// set semantics; entity lists are duplicate-free in first-seen order.
    pub fn tag(&self, content: &str) -> (BTreeSet<String>, Entities) {
        let mut tags = BTreeSet::new();
        let mut entities = Entities::default();

        for cat in &self.statuses {
            if cat.pattern.is_match(content) {
                tags.insert(format!("状态:{}", capitalize(cat.label)));
                push_unique(&mut entities.statuses, cat.label);
            }
        }

        for cat in &self.modes {
            if cat.pattern.is_match(content) {
                tags.insert(cat.label.to_string());
                push_unique(&mut entities.modes, cat.label);
            }
        }

        for cat in &self.mechanics {
            if cat.pattern.is_match(content) {
                tags.insert(cat.label.to_string());
            }
        }

        for cat in &self.identities {
            if cat.pattern.is_match(content) {
                tags.insert(cat.label.to_string());
            }
        }

        for cat in &self.teams {
            if cat.pattern.is_match(content) {
                tags.insert(cat.label.to_string());
            }
        }

        // Sinner names, normalized to the canonical Chinese form.
        for m in self.sinner_re.find_iter(content) {
            let canonical = normalize_sinner_name(m.as_str());
            if push_unique(&mut entities.sinners, &canonical) {
                tags.insert(format!("角色:{}", canonical));
            }
        }

        // EGO mentions, plus explicit "EGO:<name>" captures.
        if self.ego_mention_re.is_match(content) {
            tags.insert("EGO".to_string());
            for cap in self.ego_name_re.captures_iter(content) {
                if let Some(name) = cap.get(1) {
                    push_unique(&mut entities.egos, name.as_str());
                }
            }
        }

        // Explicit "人格:<name>" captures.
        for cap in self.identity_name_re.captures_iter(content) {
            if let Some(name) = cap.get(1) {
                push_unique(&mut entities.identities, name.as_str());
            }
        }

        // Meta tags.
        if self.beginner_re.is_match(content) {
            tags.insert("新手入门".to_string());
        }
        if self.version_re.is_match(content) {
            tags.insert("版本/更新".to_string());
        }
        if self.resource_re.is_match(content) {
            tags.insert("资源/养成".to_string());
        }
        if self.faq_re.is_match(content) {
            tags.insert("FAQ".to_string());
        }

        (tags, entities)
    }

    /// Tag every chunk in place. A total overwrite: re-tagging is idempotent.
    pub fn tag_chunks(&self, chunks: &mut [Chunk]) {
        for chunk in chunks {
            let (tags, entities) = self.tag(&chunk.content);
            chunk.tags = tags.into_iter().collect();
            chunk.entities = entities;
        }
    }

    /// Tag frequencies across a chunk set, most common first.
    pub fn tag_statistics(&self, chunks: &[Chunk]) -> Vec<(String, usize)> {
        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for chunk in chunks {
            for tag in &chunk.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        let mut stats: Vec<(String, usize)> = counts.into_iter().collect();
        stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        stats
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Append `value` if absent. Returns true when it was added.
fn push_unique(list: &mut Vec<String>, value: &str) -> bool {
    if list.iter().any(|v| v == value) {
        return false;
    }
    list.push(value.to_string());
    true
}

fn normalize_sinner_name(name: &str) -> String {
    let key = name.trim().to_lowercase();
    SINNER_CANONICAL
        .iter()
        .find(|(variant, _)| *variant == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(key)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::store::Scope;

    fn chunk(content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            index: 0,
            doc_name: String::new(),
            char_count: 0,
            tags: Vec::new(),
            entities: Entities::default(),
            scope: Scope::Global,
            group_id: None,
        }
    }

    #[test]
    fn test_status_tags_and_entities() {
        let tagger = Tagger::new();
        let (tags, entities) = tagger.tag("燃烧队的核心是叠加燃烧层数，顺带一提流血也不错");
        assert!(tags.contains("状态:Burn"));
        assert!(tags.contains("状态:Bleed"));
        assert_eq!(entities.statuses, vec!["burn".to_string(), "bleed".to_string()]);
    }

    #[test]
    fn test_case_insensitive_english_keywords() {
        let tagger = Tagger::new();
        let (tags, entities) = tagger.tag("BURN stacks scale with Clash wins");
        assert!(tags.contains("状态:Burn"));
        assert!(tags.contains("拼点/冲突"));
        assert_eq!(entities.statuses, vec!["burn".to_string()]);
    }

    #[test]
    fn test_mode_and_team_tags() {
        let tagger = Tagger::new();
        let (tags, entities) = tagger.tag("镜牢四层配队推荐，阵容以输出为主");
        assert!(tags.contains("镜牢"));
        assert!(tags.contains("配队/阵容"));
        assert!(tags.contains("定位:输出"));
        assert_eq!(entities.modes, vec!["镜牢".to_string()]);
    }

    #[test]
    fn test_sinner_normalization_and_dedup() {
        let tagger = Tagger::new();
        // Two variants of the same sinner normalize to one canonical entry.
        let (tags, entities) = tagger.tag("洪鹿和红鹿其实是同一个人，Heathcliff是另一个");
        assert_eq!(
            entities.sinners,
            vec!["洪鹿".to_string(), "希斯克利夫".to_string()]
        );
        assert!(tags.contains("角色:洪鹿"));
        assert!(tags.contains("角色:希斯克利夫"));
    }

    #[test]
    fn test_ego_mention_and_name_capture() {
        let tagger = Tagger::new();
        let (tags, entities) = tagger.tag("推荐EGO：荆棘 其次EGO:灵摆，侵蚀要小心");
        assert!(tags.contains("EGO"));
        assert!(tags.contains("EGO机制"));
        assert_eq!(entities.egos, vec!["荆棘".to_string(), "灵摆".to_string()]);
    }

    #[test]
    fn test_identity_name_capture() {
        let tagger = Tagger::new();
        let (_, entities) = tagger.tag("人格：W公司清扫人员 强度不错，人格:黑云会小哥 也可以");
        assert_eq!(
            entities.identities,
            vec!["W公司清扫人员".to_string(), "黑云会小哥".to_string()]
        );
    }

    #[test]
    fn test_meta_tags() {
        let tagger = Tagger::new();
        let (tags, _) = tagger.tag("新手入门必看：本版本更新后资源获取的FAQ");
        assert!(tags.contains("新手入门"));
        assert!(tags.contains("版本/更新"));
        assert!(tags.contains("资源/养成"));
        assert!(tags.contains("FAQ"));
    }

    #[test]
    fn test_no_match_yields_empty() {
        let tagger = Tagger::new();
        let (tags, entities) = tagger.tag("今天天气真好");
        assert!(tags.is_empty());
        assert_eq!(entities, Entities::default());
    }

    #[test]
    fn test_tagging_is_deterministic() {
        let tagger = Tagger::new();
        let text = "镜牢燃烧配队，洪鹿EGO：荆棘";
        let (tags_a, entities_a) = tagger.tag(text);
        let (tags_b, entities_b) = tagger.tag(text);
        assert_eq!(tags_a, tags_b);
        assert_eq!(entities_a, entities_b);
    }

    #[test]
    fn test_tag_chunks_idempotent() {
        let tagger = Tagger::new();
        let mut chunks = vec![chunk("燃烧队配队思路"), chunk("流血队横练")];

        tagger.tag_chunks(&mut chunks);
        let first_pass = chunks.clone();
        tagger.tag_chunks(&mut chunks);

        for (a, b) in first_pass.iter().zip(chunks.iter()) {
            assert_eq!(a.tags, b.tags);
            assert_eq!(a.entities, b.entities);
        }
        assert!(chunks[0].tags.contains(&"状态:Burn".to_string()));
        assert!(chunks[1].tags.contains(&"状态:Bleed".to_string()));
    }

    #[test]
    fn test_tag_statistics_sorted_desc() {
        let tagger = Tagger::new();
        let mut chunks = vec![
            chunk("燃烧机制详解"),
            chunk("燃烧队配队"),
            chunk("流血概述"),
        ];
        tagger.tag_chunks(&mut chunks);

        let stats = tagger.tag_statistics(&chunks);
        assert!(!stats.is_empty());
        for window in stats.windows(2) {
            assert!(window[0].1 >= window[1].1);
        }
        let burn = stats.iter().find(|(t, _)| t == "状态:Burn").unwrap();
        assert_eq!(burn.1, 2);
    }
}
