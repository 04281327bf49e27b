use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use sawyer_core::gapfill::FILLED_SUFFIX;
use sawyer_core::pipeline::{GapfillRun, QaRun};
use sawyer_core::qa::FLAG_SUFFIX;
use sawyer_core::{all_gapfill_functions, all_qa_functions};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn count_cell(count: usize) -> Cell {
    Cell::new(count).set_alignment(CellAlignment::Right)
}

pub fn print_qa_summary(logger: &str, run: &QaRun) {
    println!("QA for {logger} (data current to {})", run.as_of);
    let mut table = new_table(vec!["Column", "Flagged", "Masked", "Missing after QA"]);
    for (name, values) in run.masked.columns() {
        let flagged = run
            .flags
            .column(&format!("{name}{FLAG_SUFFIX}"))
            .map(|flags| flags.iter().filter(|code| **code != 0).count())
            .unwrap_or(0);
        let missing = values.iter().filter(|value| value.is_none()).count();
        table.add_row(vec![
            Cell::new(name),
            count_cell(flagged),
            count_cell(run.mask.count(name)),
            count_cell(missing),
        ]);
    }
    println!("{table}");
}

pub fn print_gapfill_summary(logger: &str, run: &GapfillRun) {
    println!("Gap-fill for {logger} (data current to {})", run.as_of);
    let mut table = new_table(vec!["Column", "Filled", "Still missing"]);
    for (name, values) in run.filled.columns() {
        let missing = values.iter().filter(|value| value.is_none()).count();
        table.add_row(vec![
            Cell::new(name),
            count_cell(run.indicator.count(&format!("{name}{FILLED_SUFFIX}"))),
            count_cell(missing),
        ]);
    }
    println!("{table}");
}

pub fn print_functions() {
    let mut qa = new_table(vec!["QA function", "Aliases", "Arguments", "Description"]);
    for desc in all_qa_functions() {
        qa.add_row(vec![
            desc.code.to_string(),
            desc.aliases.join(", "),
            desc.parameters.join(", "),
            desc.description.to_string(),
        ]);
    }
    println!("{qa}");

    let mut gapfill = new_table(vec!["Gap-fill function", "Sources", "Keyword arguments", "Description"]);
    for desc in all_gapfill_functions() {
        gapfill.add_row(vec![
            Cell::new(desc.code),
            count_cell(desc.required_sources),
            Cell::new(desc.parameters.join(", ")),
            Cell::new(desc.description),
        ]);
    }
    println!("{gapfill}");
}
