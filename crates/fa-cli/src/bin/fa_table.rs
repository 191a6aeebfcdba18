//! Print the intrinsic ground risk class lookup table.
//!
//! Usage:
//!   cargo run -p fa-cli --bin fa-table -- --operation bvlos

use anyhow::Result;
use clap::{Parser, ValueEnum};
use fa_core::risk::IgrcRow;
use fa_core::{GroundRiskClass, IgrcTable, OperationType, SizeCategory};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Operation {
    Vlos,
    Bvlos,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "iGRC lookup table")]
struct Args {
    /// Only print rows for this operation type
    #[arg(long, value_enum)]
    operation: Option<Operation>,

    /// Emit JSON instead of a text table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let table = IgrcTable::standard();
    table.validate()?;

    let operations = match args.operation {
        Some(Operation::Vlos) => vec![OperationType::Vlos],
        Some(Operation::Bvlos) => vec![OperationType::Bvlos],
        None => vec![OperationType::Vlos, OperationType::Bvlos],
    };
    let mut rows: Vec<(String, &IgrcRow)> = Vec::new();
    for operation in operations {
        for size in SizeCategory::ALL {
            rows.push((IgrcTable::key(operation, size), table.row(operation, size)?));
        }
    }

    if args.json {
        let map: serde_json::Map<String, serde_json::Value> = rows
            .iter()
            .map(|(key, row)| (key.clone(), serde_json::json!(row)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    print!("{:<10}", "class");
    for (key, _) in &rows {
        print!("{:>9}", key);
    }
    println!();
    for class in GroundRiskClass::ALL {
        print!("{:<10}", short_name(class));
        for (_, row) in &rows {
            print!("{:>9}", row[class.index()]);
        }
        println!();
    }
    println!(
        "size categories (m): {}",
        SizeCategory::ALL.map(|s| s.to_string()).join(", ")
    );
    Ok(())
}

fn short_name(class: GroundRiskClass) -> &'static str {
    match class {
        GroundRiskClass::ControlledGroundArea => "CGA",
        GroundRiskClass::Isolated => "<0.5",
        GroundRiskClass::ScarcelyPopulated => "<5",
        GroundRiskClass::LightlyPopulated => "<50",
        GroundRiskClass::SparselyPopulated => "<500",
        GroundRiskClass::Suburban => "<5k",
        GroundRiskClass::HighDensityMetro => "<50k",
        GroundRiskClass::AssembliesOfPeople => ">=50k",
    }
}
