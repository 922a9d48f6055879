use console::Style;
use calcium_core::params::ParameterSet;
use calcium_core::pipeline::PopulateSummary;
use calcium_core::store::{StoreConfig, Table};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    failure: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            failure: Style::new().red(),
            path: Style::new().underlined(),
        }
    }
}

fn print_title(s: &Styles, title: &str) {
    println!();
    println!("  {}", s.title.apply_to(title));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(title.chars().count())));
    println!();
}

pub fn print_populate_summary(summaries: &[PopulateSummary]) {
    let s = Styles::new();
    print_title(&s, "Populate");

    for summary in summaries {
        println!("  {}", s.header.apply_to(summary.stage));
        println!(
            "    {:<12}{}",
            s.label.apply_to("Eligible"),
            s.value.apply_to(summary.eligible)
        );
        println!(
            "    {:<12}{}",
            s.label.apply_to("Inserted"),
            s.method.apply_to(summary.inserted)
        );
        println!(
            "    {:<12}{}",
            s.label.apply_to("Skipped"),
            s.value.apply_to(summary.skipped)
        );
        if summary.failed.is_empty() {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Failed"),
                s.disabled.apply_to("none")
            );
        } else {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Failed"),
                s.failure.apply_to(summary.failed.len())
            );
            for failure in &summary.failed {
                let hint = if failure.retryable { "retryable" } else { "config" };
                println!(
                    "      {} {} {}",
                    s.value.apply_to(&failure.key),
                    s.label.apply_to(format!("[{hint}]")),
                    s.failure.apply_to(&failure.message)
                );
            }
        }
        println!();
    }
}

pub fn print_status(store: &StoreConfig, counts: &[(Table, usize)]) {
    let s = Styles::new();
    print_title(&s, "Result Store");

    match store {
        StoreConfig::Memory => println!(
            "  {:<20}{}",
            s.label.apply_to("Backend"),
            s.disabled.apply_to("memory (not persisted)")
        ),
        StoreConfig::Redb { path } => println!(
            "  {:<20}{}",
            s.label.apply_to("Backend"),
            s.path.apply_to(path.display())
        ),
    }
    println!();

    for (table, count) in counts {
        let value = if *count == 0 {
            s.disabled.apply_to(count.to_string())
        } else {
            s.value.apply_to(count.to_string())
        };
        println!("  {:<20}{}", s.label.apply_to(table), value);
    }
    println!();
}

pub fn print_parameter_sets(sets: &[ParameterSet]) {
    let s = Styles::new();
    print_title(&s, "Parameter Sets");

    if sets.is_empty() {
        println!("  {}", s.disabled.apply_to("none registered"));
        println!();
        return;
    }
    for set in sets {
        println!(
            "  {:<6}{:<10}{}",
            s.value.apply_to(set.paramset_id),
            s.method.apply_to(set.method),
            s.label.apply_to(&set.content_hash)
        );
        if !set.description.is_empty() {
            println!("        {}", set.description);
        }
        if let Some(ref version) = set.package_version {
            println!("        {} {}", s.label.apply_to("version"), version);
        }
    }
    println!();
}
