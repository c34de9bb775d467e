//! Read-only analytics over the transaction and budget tables.
//!
//! Everything here is derived at query time from committed rows. Nothing in
//! this module writes to the database, so a rejected or rolled-back mutation
//! can never show up in a report.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

use crate::{Error, auth::Claims, database_id::UserId, state::AppState};

/// The number of categories included in the top spending list.
const TOP_SPENDING_COUNT: usize = 5;

/// The reporting window for an analytics request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Period {
    /// The last 30 days.
    #[serde(rename = "30days")]
    ThirtyDays,
    /// The last 90 days.
    #[serde(rename = "90days")]
    NinetyDays,
    /// From January 1 of the current year.
    #[serde(rename = "current-year")]
    CurrentYear,
}

/// Total income and expenses over the reporting window, both as absolute
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// Total income over the window.
    pub income: f64,
    /// Total expenses over the window, as a positive number.
    pub expenses: f64,
}

/// Income, expenses and savings for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyData {
    /// The month in `YYYY-MM` form.
    pub month: String,
    /// Income earned in the month.
    pub income: f64,
    /// Amount spent in the month, as a positive number.
    pub expenses: f64,
    /// Income minus expenses. Negative when the month overspent.
    pub savings: f64,
}

/// The absolute amount spent in one category over the reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpending {
    /// The name of the category.
    pub category: String,
    /// The display color of the category.
    pub color: Option<String>,
    /// The absolute amount spent in the category.
    pub amount: f64,
}

/// A key performance indicator: its value in the current window and the
/// percentage change against the preceding window of the same length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    /// The value over the current window.
    pub current: f64,
    /// The percentage change against the preceding window.
    pub change: f64,
}

/// The key performance indicators for the reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    /// Total income.
    pub income: Kpi,
    /// Total expenses.
    pub expenses: Kpi,
    /// Income minus expenses.
    pub savings: Kpi,
    /// The share of income kept, as a percentage.
    #[serde(rename = "savingsRate")]
    pub savings_rate: Kpi,
}

/// A budget compared against what has actually been spent in its category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetVsActual {
    /// The name of the budget's category.
    pub category: String,
    /// The budget limit.
    pub limit: f64,
    /// The amount spent so far.
    pub spent: f64,
    /// The headroom left before the limit.
    pub remaining: f64,
}

/// The full analytics payload for one user and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    /// Total income and expenses over the window.
    pub totals: Totals,
    /// The monthly income and expense series, ascending.
    #[serde(rename = "monthlyData")]
    pub monthly_data: Vec<MonthlyData>,
    /// Expense totals per category, descending by amount.
    #[serde(rename = "spendingByCategory")]
    pub spending_by_category: Vec<CategorySpending>,
    /// The five largest entries of the category spending list.
    #[serde(rename = "topSpending")]
    pub top_spending: Vec<CategorySpending>,
    /// The key performance indicators.
    pub kpis: Kpis,
    /// Each budget compared against actual spending.
    #[serde(rename = "budgetVsActual")]
    pub budget_vs_actual: Vec<BudgetVsActual>,
    /// The mean budget adherence percentage.
    #[serde(rename = "budgetAdherence")]
    pub budget_adherence: f64,
}

/// A route handler for the analytics report.
///
/// An unknown period segment fails path deserialization and produces a 400
/// response before this handler runs.
pub async fn get_analytics_endpoint(
    State(state): State<AppState>,
    claims: Claims,
    Path(period): Path<Period>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.db_connection.lock().map_err(|_| Error::DatabaseLock)?;
    let today = OffsetDateTime::now_utc().date();
    let report = build_report(claims.sub, period, today, &connection)?;

    Ok(Json(report))
}

/// Build the analytics report for `user_id` with the reporting window ending
/// at `today`.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn build_report(
    user_id: UserId,
    period: Period,
    today: Date,
    connection: &Connection,
) -> Result<AnalyticsReport, Error> {
    let (start, end) = window(period, today);

    let totals = window_totals(user_id, start, end, connection)?;
    let monthly_data = monthly_data(user_id, start, end, connection)?;
    let spending_by_category = spending_by_category(user_id, start, end, connection)?;
    let top_spending = spending_by_category
        .iter()
        .take(TOP_SPENDING_COUNT)
        .cloned()
        .collect();

    // The preceding window has the same length and ends where this one starts.
    let previous_start = start - (end - start);
    let previous = window_totals(user_id, previous_start, start, connection)?;
    let kpis = build_kpis(totals, previous);

    let budget_vs_actual = budget_vs_actual(user_id, connection)?;
    let budget_adherence = budget_adherence(user_id, connection)?;

    Ok(AnalyticsReport {
        totals,
        monthly_data,
        spending_by_category,
        top_spending,
        kpis,
        budget_vs_actual,
        budget_adherence,
    })
}

/// The half-open date window `[start, end)` for a period ending at `today`.
/// `end` is the day after `today` so that today's transactions are included.
fn window(period: Period, today: Date) -> (Date, Date) {
    let end = today.next_day().unwrap_or(today);
    let start = match period {
        Period::ThirtyDays => today - Duration::days(30),
        Period::NinetyDays => today - Duration::days(90),
        Period::CurrentYear => Date::from_ordinal_date(today.year(), 1).unwrap_or(today),
    };

    (start, end)
}

fn window_totals(
    user_id: UserId,
    start: Date,
    end: Date,
    connection: &Connection,
) -> Result<Totals, Error> {
    let totals = connection
        .prepare(
            "SELECT COALESCE(SUM(CASE WHEN type = 'income' THEN amount ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN type = 'expense' THEN -amount ELSE 0 END), 0)
             FROM \"transaction\"
             WHERE user_id = ?1 AND date >= ?2 AND date < ?3",
        )?
        .query_one((user_id, start, end), |row| {
            Ok(Totals {
                income: row.get(0)?,
                expenses: row.get(1)?,
            })
        })?;

    Ok(totals)
}

fn monthly_data(
    user_id: UserId,
    start: Date,
    end: Date,
    connection: &Connection,
) -> Result<Vec<MonthlyData>, Error> {
    let rows: Vec<(Date, f64)> = connection
        .prepare(
            "SELECT date, amount FROM \"transaction\"
             WHERE user_id = ?1 AND date >= ?2 AND date < ?3
             ORDER BY date ASC",
        )?
        .query_map((user_id, start, end), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<_, _>>()?;

    // The rows arrive in date order, so months come out ascending.
    let mut months: Vec<MonthlyData> = Vec::new();

    for (date, amount) in rows {
        let month = format!("{:04}-{:02}", date.year(), u8::from(date.month()));

        if months.last().map(|entry| entry.month.as_str()) != Some(month.as_str()) {
            months.push(MonthlyData {
                month,
                income: 0.0,
                expenses: 0.0,
                savings: 0.0,
            });
        }

        if let Some(entry) = months.last_mut() {
            if amount >= 0.0 {
                entry.income += amount;
            } else {
                entry.expenses += -amount;
            }
            entry.savings = entry.income - entry.expenses;
        }
    }

    Ok(months)
}

fn spending_by_category(
    user_id: UserId,
    start: Date,
    end: Date,
    connection: &Connection,
) -> Result<Vec<CategorySpending>, Error> {
    connection
        .prepare(
            "SELECT category.name, category.color, SUM(-\"transaction\".amount) AS amount
             FROM \"transaction\"
             JOIN category ON \"transaction\".category_id = category.id
             WHERE \"transaction\".user_id = ?1 AND \"transaction\".type = 'expense'
                   AND date >= ?2 AND date < ?3
             GROUP BY category.id
             ORDER BY amount DESC, category.name ASC",
        )?
        .query_map((user_id, start, end), |row| {
            Ok(CategorySpending {
                category: row.get(0)?,
                color: row.get(1)?,
                amount: row.get(2)?,
            })
        })?
        .map(|maybe_spending| maybe_spending.map_err(|error| error.into()))
        .collect()
}

fn build_kpis(current: Totals, previous: Totals) -> Kpis {
    let current_savings = current.income - current.expenses;
    let previous_savings = previous.income - previous.expenses;
    let current_rate = savings_rate(current.income, current.expenses);
    let previous_rate = savings_rate(previous.income, previous.expenses);

    Kpis {
        income: Kpi {
            current: current.income,
            change: percentage_change(current.income, previous.income),
        },
        expenses: Kpi {
            current: current.expenses,
            change: percentage_change(current.expenses, previous.expenses),
        },
        savings: Kpi {
            current: current_savings,
            change: percentage_change(current_savings, previous_savings),
        },
        savings_rate: Kpi {
            current: current_rate,
            change: percentage_change(current_rate, previous_rate),
        },
    }
}

/// The percentage change from `previous` to `current`.
///
/// Zero when both values are zero, and 100 when only `previous` is zero, so
/// a report never contains NaN or infinity.
fn percentage_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 { 0.0 } else { 100.0 }
    } else {
        (current - previous) / previous.abs() * 100.0
    }
}

/// The share of income left after expenses, as a percentage. Zero when there
/// is no income.
fn savings_rate(income: f64, expenses: f64) -> f64 {
    if income == 0.0 {
        0.0
    } else {
        (income - expenses) / income * 100.0
    }
}

fn budget_vs_actual(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<BudgetVsActual>, Error> {
    connection
        .prepare(
            "SELECT category.name, budget.\"limit\", budget.spent
             FROM budget
             JOIN category ON budget.category_id = category.id
             WHERE budget.user_id = ?1
             ORDER BY category.name ASC",
        )?
        .query_map([user_id], |row| {
            let limit: f64 = row.get(1)?;
            let spent: f64 = row.get(2)?;

            Ok(BudgetVsActual {
                category: row.get(0)?,
                limit,
                spent,
                remaining: limit - spent,
            })
        })?
        .map(|maybe_row| maybe_row.map_err(|error| error.into()))
        .collect()
}

/// The mean budget adherence across the user's budgets, where each budget
/// contributes `min(spent / limit * 100, 100)`. Zero when the user has no
/// budgets.
fn budget_adherence(user_id: UserId, connection: &Connection) -> Result<f64, Error> {
    let adherence = connection
        .prepare(
            "SELECT COALESCE(AVG(MIN(spent * 100.0 / \"limit\", 100.0)), 0)
             FROM budget WHERE user_id = ?1",
        )?
        .query_one([user_id], |row| row.get(0))?;

    Ok(adherence)
}


#[cfg(test)]
mod report_tests {
    use time::macros::date;

    use crate::{
        Error,
        transaction::{
            NewTransaction, TransactionType, create_transaction,
            test_utils::{
                create_test_budget, create_test_category, create_test_user, get_test_connection,
            },
        },
    };

    use super::{Period, build_report};

    const TODAY: time::Date = date!(2025 - 06 - 15);

    fn record(
        connection: &mut rusqlite::Connection,
        user_id: i64,
        category_id: i64,
        date: time::Date,
        transaction_type: TransactionType,
        amount: f64,
    ) {
        create_transaction(
            NewTransaction {
                date,
                description: String::new(),
                category_id,
                transaction_type,
                amount,
            },
            user_id,
            connection,
        )
        .expect("Could not create transaction");
    }

    #[test]
    fn totals_report_absolute_values() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 06 - 10),
            TransactionType::Income,
            1000.0,
        );
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 06 - 12),
            TransactionType::Expense,
            300.0,
        );

        let report = build_report(user_id, Period::ThirtyDays, TODAY, &connection).unwrap();

        assert_eq!(report.totals.income, 1000.0);
        assert_eq!(report.totals.expenses, 300.0);
    }

    #[test]
    fn window_excludes_transactions_before_start() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        // 31 days before TODAY, outside the 30 day window.
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 05 - 15),
            TransactionType::Expense,
            50.0,
        );
        record(
            &mut connection,
            user_id,
            category_id,
            TODAY,
            TransactionType::Expense,
            20.0,
        );

        let report = build_report(user_id, Period::ThirtyDays, TODAY, &connection).unwrap();

        assert_eq!(report.totals.expenses, 20.0);
    }

    #[test]
    fn current_year_window_starts_on_january_first() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2024 - 12 - 31),
            TransactionType::Expense,
            99.0,
        );
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 01 - 01),
            TransactionType::Expense,
            10.0,
        );

        let report = build_report(user_id, Period::CurrentYear, TODAY, &connection).unwrap();

        assert_eq!(report.totals.expenses, 10.0);
    }

    #[test]
    fn monthly_data_groups_by_month_ascending() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 05 - 20),
            TransactionType::Income,
            500.0,
        );
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 05 - 25),
            TransactionType::Expense,
            100.0,
        );
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 06 - 01),
            TransactionType::Expense,
            40.0,
        );

        let report = build_report(user_id, Period::NinetyDays, TODAY, &connection).unwrap();

        assert_eq!(report.monthly_data.len(), 2);
        assert_eq!(report.monthly_data[0].month, "2025-05");
        assert_eq!(report.monthly_data[0].income, 500.0);
        assert_eq!(report.monthly_data[0].expenses, 100.0);
        assert_eq!(report.monthly_data[0].savings, 400.0);
        assert_eq!(report.monthly_data[1].month, "2025-06");
        assert_eq!(report.monthly_data[1].savings, -40.0);
    }

    #[test]
    fn spending_by_category_is_descending_and_top_spending_truncates() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let categories = ["A", "B", "C", "D", "E", "F"];
        for (index, name) in categories.iter().enumerate() {
            let category_id = create_test_category(name, user_id, &connection);
            record(
                &mut connection,
                user_id,
                category_id,
                TODAY,
                TransactionType::Expense,
                (index + 1) as f64 * 10.0,
            );
        }

        let report = build_report(user_id, Period::ThirtyDays, TODAY, &connection).unwrap();

        assert_eq!(report.spending_by_category.len(), 6);
        assert_eq!(report.spending_by_category[0].category, "F");
        assert_eq!(report.spending_by_category[0].amount, 60.0);
        assert_eq!(report.spending_by_category[5].amount, 10.0);
        assert_eq!(report.top_spending.len(), 5);
        assert_eq!(report.top_spending[4].category, "B");
    }

    #[test]
    fn kpis_compare_against_the_preceding_window() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        // Preceding 30 day window.
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 05 - 01),
            TransactionType::Expense,
            100.0,
        );
        // Current window.
        record(
            &mut connection,
            user_id,
            category_id,
            date!(2025 - 06 - 10),
            TransactionType::Expense,
            150.0,
        );

        let report = build_report(user_id, Period::ThirtyDays, TODAY, &connection).unwrap();

        assert_eq!(report.kpis.expenses.current, 150.0);
        assert_eq!(report.kpis.expenses.change, 50.0);
    }

    #[test]
    fn budget_adherence_averages_capped_utilization() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let food = create_test_category("Food", user_id, &connection);
        let transport = create_test_category("Transport", user_id, &connection);
        create_test_budget(food, 100.0, user_id, &connection);
        create_test_budget(transport, 100.0, user_id, &connection);
        record(
            &mut connection,
            user_id,
            food,
            TODAY,
            TransactionType::Expense,
            50.0,
        );
        record(
            &mut connection,
            user_id,
            transport,
            TODAY,
            TransactionType::Expense,
            100.0,
        );

        let report = build_report(user_id, Period::ThirtyDays, TODAY, &connection).unwrap();

        // (50% + 100%) / 2
        assert_eq!(report.budget_adherence, 75.0);
        assert_eq!(report.budget_vs_actual.len(), 2);
        assert_eq!(report.budget_vs_actual[0].category, "Food");
        assert_eq!(report.budget_vs_actual[0].remaining, 50.0);
    }

    #[test]
    fn budget_adherence_is_zero_without_budgets() {
        let connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);

        let report = build_report(user_id, Period::ThirtyDays, TODAY, &connection).unwrap();

        assert_eq!(report.budget_adherence, 0.0);
        assert!(report.budget_vs_actual.is_empty());
    }

    #[test]
    fn rejected_writes_never_show_up_in_reports() {
        let mut connection = get_test_connection();
        let user_id = create_test_user("foo@bar.baz", &connection);
        let category_id = create_test_category("Food", user_id, &connection);
        create_test_budget(category_id, 100.0, user_id, &connection);
        record(
            &mut connection,
            user_id,
            category_id,
            TODAY,
            TransactionType::Expense,
            40.0,
        );

        let result = create_transaction(
            NewTransaction {
                date: TODAY,
                description: String::new(),
                category_id,
                transaction_type: TransactionType::Expense,
                amount: 70.0,
            },
            user_id,
            &mut connection,
        );
        assert_eq!(result, Err(Error::BudgetExceeded { remaining: 60.0 }));

        let report = build_report(user_id, Period::ThirtyDays, TODAY, &connection).unwrap();

        assert_eq!(report.totals.expenses, 40.0);
        assert_eq!(report.spending_by_category[0].amount, 40.0);
        assert_eq!(report.budget_vs_actual[0].spent, 40.0);
    }

    #[test]
    fn reports_only_cover_the_requesting_user() {
        let mut connection = get_test_connection();
        let owner = create_test_user("foo@bar.baz", &connection);
        let other = create_test_user("baz@bar.foo", &connection);
        let category_id = create_test_category("Food", owner, &connection);
        record(
            &mut connection,
            owner,
            category_id,
            TODAY,
            TransactionType::Expense,
            40.0,
        );

        let report = build_report(other, Period::ThirtyDays, TODAY, &connection).unwrap();

        assert_eq!(report.totals.expenses, 0.0);
        assert!(report.spending_by_category.is_empty());
    }
}
