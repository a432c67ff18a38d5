//! Profit-and-loss reporting over the position ledger.
//!
//! Realized figures come from consumed lot portions only; open lots carry
//! their cost at face value. Wei amounts are rendered as 18-decimal token
//! quantities in the CSV output.

use std::io::Write;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::Address;
use crate::ledger::{LedgerError, PositionLedger};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("amount {0} does not fit the report's decimal range")]
    AmountOverflow(i128),
}

/// One (holder, asset) line of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PnlRow {
    pub holder: Address,
    pub asset: crate::domain::Asset,
    pub open_quantity: u64,
    /// Cost still tied up in unsold shares.
    pub open_cost_wei: u128,
    pub realized_cost_wei: u128,
    pub realized_proceeds_wei: u128,
    pub realized_pnl_wei: i128,
}

#[derive(Debug, Clone, Default)]
pub struct PnlReport {
    pub rows: Vec<PnlRow>,
    pub total_open_cost_wei: u128,
    pub total_realized_pnl_wei: i128,
}

impl PnlReport {
    /// Materialize the report, optionally restricted to one holder.
    ///
    /// Rows come out in (holder, asset) order, matching the ledger snapshot.
    pub fn build(
        ledger: &PositionLedger,
        holder: Option<&Address>,
    ) -> Result<Self, ReportError> {
        let mut report = PnlReport::default();
        for entry in ledger.snapshot(holder)? {
            let mut row = PnlRow {
                holder: entry.holder,
                asset: entry.asset,
                open_quantity: 0,
                open_cost_wei: 0,
                realized_cost_wei: 0,
                realized_proceeds_wei: 0,
                realized_pnl_wei: 0,
            };
            for lot in entry.active.iter().chain(entry.archived.iter()) {
                row.open_quantity += lot.remaining_quantity;
                row.open_cost_wei += lot.cost_wei - lot.consumed_cost_wei();
                row.realized_cost_wei += lot.consumed_cost_wei();
                row.realized_proceeds_wei += lot.sale_proceeds_wei;
            }
            row.realized_pnl_wei =
                row.realized_proceeds_wei as i128 - row.realized_cost_wei as i128;

            report.total_open_cost_wei += row.open_cost_wei;
            report.total_realized_pnl_wei += row.realized_pnl_wei;
            report.rows.push(row);
        }
        Ok(report)
    }

    /// Write the report as CSV with a trailing totals row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ReportError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record([
            "holder",
            "asset",
            "open_quantity",
            "open_cost",
            "realized_cost",
            "realized_proceeds",
            "realized_pnl",
        ])?;
        for row in &self.rows {
            csv.write_record([
                row.holder.to_string(),
                row.asset.to_string(),
                row.open_quantity.to_string(),
                tokens(row.open_cost_wei as i128)?.to_string(),
                tokens(row.realized_cost_wei as i128)?.to_string(),
                tokens(row.realized_proceeds_wei as i128)?.to_string(),
                tokens(row.realized_pnl_wei)?.to_string(),
            ])?;
        }
        csv.write_record([
            "TOTAL".to_string(),
            String::new(),
            String::new(),
            tokens(self.total_open_cost_wei as i128)?.to_string(),
            String::new(),
            String::new(),
            tokens(self.total_realized_pnl_wei)?.to_string(),
        ])?;
        csv.flush()?;
        Ok(())
    }
}

/// Wei to 18-decimal token quantity.
fn tokens(wei: i128) -> Result<Decimal, ReportError> {
    let mut value = Decimal::try_from_i128_with_scale(wei, 18)
        .map_err(|_| ReportError::AmountOverflow(wei))?;
    value.normalize_assign();
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, NewLot};
    use tempfile::TempDir;

    #[test]
    fn test_report_splits_open_and_realized() {
        let dir = TempDir::new().unwrap();
        let ledger = PositionLedger::open(dir.path()).unwrap();
        let holder = Address::new("0xaaa");
        let asset = Asset::new("0xfff");
        ledger.add_holder(&holder).unwrap();
        let seq = ledger
            .add_lot(
                &holder,
                &asset,
                NewLot {
                    quantity: 10,
                    cost_wei: 1000,
                    purchase_block: 100,
                    supply_at_purchase: 10,
                },
            )
            .unwrap();
        // Sell 4 of 10 for 600 wei: realized cost 400, pnl +200.
        ledger.consume_lot(&holder, &asset, seq, 4, 105, 600).unwrap();

        let report = PnlReport::build(&ledger, None).unwrap();
        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.open_quantity, 6);
        assert_eq!(row.open_cost_wei, 600);
        assert_eq!(row.realized_cost_wei, 400);
        assert_eq!(row.realized_proceeds_wei, 600);
        assert_eq!(row.realized_pnl_wei, 200);
        assert_eq!(report.total_realized_pnl_wei, 200);
    }

    #[test]
    fn test_csv_renders_token_decimals() {
        let dir = TempDir::new().unwrap();
        let ledger = PositionLedger::open(dir.path()).unwrap();
        let holder = Address::new("0xaaa");
        ledger.add_holder(&holder).unwrap();
        ledger
            .add_lot(
                &holder,
                &Asset::new("0xfff"),
                NewLot {
                    quantity: 2,
                    cost_wei: 1_500_000_000_000_000_000,
                    purchase_block: 100,
                    supply_at_purchase: 2,
                },
            )
            .unwrap();

        let report = PnlReport::build(&ledger, None).unwrap();
        let mut out = Vec::new();
        report.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("1.5"));
        assert!(text.starts_with("holder,asset,open_quantity"));
    }
}
