use std::collections::BTreeMap;
use std::fmt::Write;

use crate::table::ObjectTable;

/// Render the per-type size table: plain and blessed buckets merged by
/// prose name, sorted by total size descending, with a Total row.
pub fn render_sizes(table: &ObjectTable) -> String {
    let stats = table.stats();
    let mut merged: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for (ty, count) in &stats.count_by_type {
        merged.entry(ty.name().to_string()).or_default().0 += count;
    }
    for (ty, size) in &stats.size_by_type {
        merged.entry(ty.name().to_string()).or_default().1 += size;
    }
    for (bucket, count) in &stats.count_by_blessed {
        merged.entry(bucket.clone()).or_default().0 += count;
    }
    for (bucket, size) in &stats.size_by_blessed {
        merged.entry(bucket.clone()).or_default().1 += size;
    }

    let mut rows: Vec<(String, u64, u64)> = merged
        .into_iter()
        .map(|(name, (count, size))| (name, count, size))
        .collect();
    rows.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let count: u64 = rows.iter().map(|row| row.1).sum();
    let total: u64 = rows.iter().map(|row| row.2).sum();
    rows.push(("Total".to_string(), count, total));

    let mut width = ["Type".len(), "SVs".len(), "Bytes".len()];
    for (name, count, size) in &rows {
        width[0] = width[0].max(name.len());
        width[1] = width[1].max(count.to_string().len());
        width[2] = width[2].max(size.to_string().len());
    }

    let mut out = String::new();
    writeln!(
        out,
        "{:<w0$} | {:<w1$} | {:<w2$}",
        "Type",
        "SVs",
        "Bytes",
        w0 = width[0],
        w1 = width[1],
        w2 = width[2],
    )
    .unwrap();
    for (name, count, size) in &rows {
        writeln!(
            out,
            "{:<w0$} | {:>w1$} | {:>w2$}",
            name,
            count,
            size,
            w0 = width[0],
            w1 = width[1],
            w2 = width[2],
        )
        .unwrap();
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sv::{ScalarBody, StashBody, Sv, SvBody, SvHead};
    use crate::{PmatString, Ptr};

    fn sv(addr: u64, size: u64, blessed: u64, body: SvBody) -> Sv {
        Sv {
            head: SvHead {
                address: Ptr(addr),
                refcnt: 1,
                size,
                blessed: Ptr(blessed),
            },
            body,
        }
    }

    #[test]
    fn merges_blessed_buckets_and_sorts_by_size() {
        let mut table = ObjectTable::new();
        table.add(sv(
            0x2000,
            120,
            0,
            SvBody::Stash(StashBody {
                name: PmatString::new(b"Foo".to_vec()),
                ..StashBody::default()
            }),
        ));
        table.add(sv(0x1000, 24, 0, SvBody::Scalar(ScalarBody::default())));
        table.add(sv(
            0x1100,
            32,
            0x2000,
            SvBody::Scalar(ScalarBody::default()),
        ));

        let rendered = render_sizes(&table);
        let expected = "\
Type        | SVs | Bytes
STASH       |   1 |   120
SCALAR(Foo) |   1 |    32
SCALAR      |   1 |    24
Total       |   3 |   176
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn empty_table_renders_only_headers_and_total() {
        let table = ObjectTable::new();
        let rendered = render_sizes(&table);
        assert_eq!(rendered, "Type  | SVs | Bytes\nTotal |   0 |     0\n");
    }
}
