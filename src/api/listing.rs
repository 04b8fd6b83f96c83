//! Purpose: Render table and tag listings as CSV text.
//! Exports: `tables_csv`, `tags_csv`.
//! Role: Shared by `GET /tables`, `GET /tags`, and the matching CLI commands.
//! Invariants: Column lists are `|`-joined here so they fit in one CSV field.
use crate::core::tabledef::TableDef;
use crate::core::tags::TagInfo;

pub const TABLES_HEADER: &str = "name,columns";
pub const TAGS_HEADER: &str = "name,n_tables";

pub fn tables_csv(defs: &[TableDef]) -> String {
    let mut out = String::from(TABLES_HEADER);
    out.push('\n');
    for def in defs {
        out.push_str(&def.name);
        out.push(',');
        out.push_str(&def.joined_columns());
        out.push('\n');
    }
    out
}

pub fn tags_csv(infos: &[TagInfo]) -> String {
    let mut out = String::from(TAGS_HEADER);
    out.push('\n');
    for info in infos {
        out.push_str(&format!("{},{}\n", info.name, info.num_tables));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{tables_csv, tags_csv};
    use crate::core::tabledef::TableDef;
    use crate::core::tags::TagInfo;

    #[test]
    fn tables_listing_joins_columns_with_pipe() {
        let defs = vec![
            TableDef::new("people", vec!["email".into(), "name".into()]),
            TableDef::new("empty", vec![String::new()]),
        ];
        assert_eq!(
            tables_csv(&defs),
            "name,columns\npeople,email|name\nempty,\n"
        );
    }

    #[test]
    fn tags_listing_has_counts() {
        let infos = vec![TagInfo {
            name: "vip".into(),
            num_tables: 3,
        }];
        assert_eq!(tags_csv(&infos), "name,n_tables\nvip,3\n");
        assert_eq!(tags_csv(&[]), "name,n_tables\n");
    }
}
