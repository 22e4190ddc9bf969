//! 合并分类与改写结果
//!
//! 按临时关联 ID 匹配，不依赖顺序。

use std::collections::HashMap;

use crate::models::{CategorizationResult, QuestionItem, RewriteResult};

/// 合并统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub categorized: usize,
    pub rewritten: usize,
    /// 结果中找不到对应题目的条目
    pub unmatched: usize,
}

pub fn merge_enrichment(
    items: &mut [QuestionItem],
    categories: &[CategorizationResult],
    rewrites: &[RewriteResult],
) -> MergeStats {
    let mut stats = MergeStats::default();
    let index: HashMap<String, usize> = items
        .iter()
        .enumerate()
        .map(|(i, q)| (q.temp_id.clone(), i))
        .collect();

    for category in categories {
        match index.get(&category.item_id) {
            Some(&i) => {
                let item = &mut items[i];
                for tag in &category.tags {
                    if !item.category_tags.contains(tag) {
                        item.category_tags.push(tag.clone());
                    }
                }
                stats.categorized += 1;
            }
            None => stats.unmatched += 1,
        }
    }

    for rewrite in rewrites {
        match index.get(&rewrite.item_id) {
            Some(&i) if !rewrite.rewritten_text.trim().is_empty() => {
                items[i].comment = rewrite.rewritten_text.trim().to_string();
                stats.rewritten += 1;
            }
            Some(_) => {}
            None => stats.unmatched += 1,
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedItem;

    fn item(id: &str) -> QuestionItem {
        QuestionItem::from_extracted(ExtractedItem::default(), id.to_string(), 0)
    }

    #[test]
    fn merges_by_id_regardless_of_order() {
        let mut items = vec![item("a"), item("b")];
        let categories = vec![
            CategorizationResult {
                item_id: "b".into(),
                tags: vec!["Pediatria".into()],
            },
            CategorizationResult {
                item_id: "a".into(),
                tags: vec!["Cirurgia".into(), "Cirurgia".into()],
            },
        ];
        let rewrites = vec![
            RewriteResult {
                item_id: "b".into(),
                rewritten_text: " novo comentário ".into(),
            },
            RewriteResult {
                item_id: "zzz".into(),
                rewritten_text: "x".into(),
            },
        ];

        let stats = merge_enrichment(&mut items, &categories, &rewrites);

        assert_eq!(items[0].category_tags, vec!["Cirurgia".to_string()]);
        assert_eq!(items[1].category_tags, vec!["Pediatria".to_string()]);
        assert_eq!(items[1].comment, "novo comentário");
        assert_eq!(items[0].comment, "");
        assert_eq!(
            stats,
            MergeStats {
                categorized: 2,
                rewritten: 1,
                unmatched: 1
            }
        );
    }
}
