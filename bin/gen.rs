use clap::{Arg, ArgAction, Command};
use rust_xlsxwriter::Workbook;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let matches = Command::new("gen")
        .about("Write a synthetic sku/qty/price/active workbook")
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_parser(clap::value_parser!(u32))
                .required(true),
        )
        .arg(
            Arg::new("out")
                .long("out")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new("blank_rows")
                .long("blank-rows")
                .help("Empty rows written above the header")
                .value_parser(clap::value_parser!(u32))
                .default_value("0"),
        )
        .arg(
            Arg::new("bad_every")
                .long("bad-every")
                .help("Make every Nth row fail validation (0 = never)")
                .value_parser(clap::value_parser!(u32))
                .default_value("0"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let rows: u32 = *matches.get_one("rows").unwrap();
    let out: &PathBuf = matches.get_one("out").unwrap();
    let blank_rows: u32 = *matches.get_one("blank_rows").unwrap();
    let bad_every: u32 = *matches.get_one("bad_every").unwrap();

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    let header_row = blank_rows;
    for (col, name) in ["sku", "qty", "price", "active"].iter().enumerate() {
        sheet.write_string(header_row, col as u16, *name)?;
    }

    // Very simple deterministic data: SKU##########, qty, price, active
    for i in 0..rows {
        let line = header_row + 1 + i;
        let bad = bad_every > 0 && (i + 1) % bad_every == 0;
        sheet.write_string(line, 0, format!("SKU{:010}", i))?;
        if bad {
            sheet.write_string(line, 1, "n/a")?;
        } else {
            sheet.write_number(line, 1, f64::from(i % 100))?;
        }
        sheet.write_string(line, 2, format!("{}.{:02}", i % 1000, i % 100))?;
        sheet.write_boolean(line, 3, i % 2 == 0)?;
    }

    workbook.save(out)?;
    if !matches.get_flag("quiet") {
        println!("wrote {} rows to {}", rows, out.display());
    }
    Ok(())
}
