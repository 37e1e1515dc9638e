use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::formats::StructureDescription;

/// Checks a structure description before anything is written.
///
/// Every problem is reported, not just the first one.
pub fn validate(description: &StructureDescription) -> Result<()> {
    let mut issues = Vec::new();
    let page_count = description.metadata.page_count;

    check_positions(
        &mut issues,
        "headings",
        description.headings.iter().map(|h| h.position),
    );
    for (i, heading) in description.headings.iter().enumerate() {
        let label = format!("heading {}", i + 1);
        if heading.text.trim().is_empty() {
            issues.push(format!("{label}: text is empty"));
        }
        check_page(&mut issues, &label, heading.page, page_count);
        check_positions(
            &mut issues,
            &format!("{label} subheadings"),
            heading.subheadings.iter().map(|s| s.position),
        );

        for (j, subheading) in heading.subheadings.iter().enumerate() {
            let label = format!("{label} subheading {}", j + 1);
            if subheading.title.trim().is_empty() {
                issues.push(format!("{label}: title is empty"));
            }
            check_page(&mut issues, &label, subheading.page, page_count);
            check_positions(
                &mut issues,
                &format!("{label} visuals"),
                subheading.visuals.iter().map(|v| v.position),
            );

            for (k, visual) in subheading.visuals.iter().enumerate() {
                let label = format!("{label} visual {}", k + 1);
                if visual.image_ref.trim().is_empty() {
                    issues.push(format!("{label}: image reference is empty"));
                }
                check_page(&mut issues, &label, visual.page, page_count);
            }
        }
    }

    let mut seen_pages = HashSet::new();
    for page in &description.pages {
        let label = format!("page {}", page.page_number);
        check_page(&mut issues, &label, page.page_number, page_count);
        if !seen_pages.insert(page.page_number) {
            issues.push(format!("{label}: duplicate page number"));
        }
        if page.image_ref.trim().is_empty() {
            issues.push(format!("{label}: image reference is empty"));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(issues))
    }
}

/// Siblings in ordinal order. An omitted position means list order; ties cannot occur once
/// [`validate`] has passed. The returned index is the dense position to store.
pub(crate) fn dense_order<T>(items: &[T], position: impl Fn(&T) -> Option<i64>) -> Vec<&T> {
    let mut ordered = items
        .iter()
        .enumerate()
        .map(|(index, item)| (position(item).unwrap_or(index as i64), item))
        .collect::<Vec<_>>();
    ordered.sort_by_key(|(position, _)| *position);
    ordered.into_iter().map(|(_, item)| item).collect()
}

fn check_page(issues: &mut Vec<String>, label: &str, page: i64, page_count: u32) {
    if page < 1 {
        issues.push(format!("{label}: page reference {page} is not 1-indexed"));
    } else if page_count > 0 && page > i64::from(page_count) {
        issues.push(format!(
            "{label}: page reference {page} exceeds page count {page_count}"
        ));
    } else if page > i64::from(u32::MAX) {
        issues.push(format!("{label}: page reference {page} is out of range"));
    }
}

fn check_positions(
    issues: &mut Vec<String>,
    label: &str,
    positions: impl Iterator<Item = Option<i64>>,
) {
    let mut seen = HashSet::new();
    for (index, position) in positions.enumerate() {
        let effective = position.unwrap_or(index as i64);
        if effective < 0 {
            issues.push(format!("{label}: negative position {effective}"));
        } else if !seen.insert(effective) {
            issues.push(format!("{label}: duplicate position {effective}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{DocumentMetadata, HeadingSpec, PageSpec, SubheadingSpec, VisualSpec};

    fn heading(text: &str, page: i64) -> HeadingSpec {
        HeadingSpec {
            text: text.to_owned(),
            page,
            position: None,
            subheadings: Vec::new(),
        }
    }

    fn description(headings: Vec<HeadingSpec>) -> StructureDescription {
        StructureDescription {
            metadata: DocumentMetadata {
                title: "Manual".to_owned(),
                page_count: 4,
                ..DocumentMetadata::default()
            },
            headings,
            pages: Vec::new(),
        }
    }

    fn issues(description: &StructureDescription) -> Vec<String> {
        match validate(description) {
            Err(Error::Validation(issues)) => issues,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn well_formed_description_passes() {
        let mut intro = heading("Intro", 1);
        intro.subheadings.push(SubheadingSpec {
            title: "Scope".to_owned(),
            context: "What this covers".to_owned(),
            page: 2,
            position: None,
            visuals: vec![VisualSpec {
                caption: "Figure 1".to_owned(),
                image_ref: "fig-1".to_owned(),
                page: 2,
                position: None,
            }],
        });
        assert!(validate(&description(vec![intro, heading("Usage", 3)])).is_ok());
    }

    #[test]
    fn reports_empty_text_and_bad_pages_together() {
        let issues = issues(&description(vec![heading("  ", 0), heading("Late", 9)]));
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("text is empty"));
        assert!(issues[1].contains("not 1-indexed"));
        assert!(issues[2].contains("exceeds page count 4"));
    }

    #[test]
    fn duplicate_positions_are_rejected() {
        let mut a = heading("A", 1);
        a.position = Some(1);
        let b = heading("B", 1);
        // `b` is implicitly at position 1 as well.
        let issues = issues(&description(vec![a, b]));
        assert_eq!(issues, vec!["headings: duplicate position 1".to_owned()]);
    }

    #[test]
    fn duplicate_page_numbers_are_rejected() {
        let mut description = description(vec![heading("A", 1)]);
        description.pages = vec![
            PageSpec {
                page_number: 2,
                image_ref: "p2".to_owned(),
            },
            PageSpec {
                page_number: 2,
                image_ref: "p2-again".to_owned(),
            },
        ];
        let issues = issues(&description);
        assert_eq!(issues, vec!["page 2: duplicate page number".to_owned()]);
    }

    #[test]
    fn unknown_page_count_skips_upper_bound() {
        let mut description = description(vec![heading("A", 120)]);
        description.metadata.page_count = 0;
        assert!(validate(&description).is_ok());
    }

    #[test]
    fn dense_order_sorts_sparse_positions() {
        let mut a = heading("A", 1);
        a.position = Some(10);
        let mut b = heading("B", 1);
        b.position = Some(3);
        let items = [a, b];
        let ordered = dense_order(&items, |h| h.position);
        let texts = ordered.iter().map(|h| h.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["B", "A"]);
    }
}
