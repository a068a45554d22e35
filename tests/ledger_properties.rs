//! Ledger invariants under concurrency and randomized workloads
//!
//! Runs against the memory store. Every test ends with an audit, which replays
//! the entry log and checks that transactions are balanced, cached balances
//! equal their replay and no customer balance is negative.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use double_entry_ledger::core::{AccountNumber, Clock, FixedClock, SeededRandom};
use double_entry_ledger::{
    Account, CustomerRegistry, EntryType, HistoryQuery, Ledger, LedgerConfig, LedgerError,
    LedgerStore, MemoryLedgerStore, Money, TransactionType, CLEARING_ACCOUNT,
};
use proptest::prelude::*;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
}

struct Fixture {
    ledger: Ledger<MemoryLedgerStore>,
    registry: Arc<CustomerRegistry>,
}

impl Fixture {
    fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::on(date()));
        let registry = Arc::new(CustomerRegistry::new());
        let config = LedgerConfig::default();
        let ledger = Ledger::new(
            MemoryLedgerStore::new(Arc::clone(&clock), config.lock_timeout),
            registry.clone(),
            clock,
            Arc::new(SeededRandom::new(11)),
            config,
        );
        Self { ledger, registry }
    }

    fn open(&self, name: &str, deposit: i64) -> Account {
        let email = format!("{name}@example.com");
        let customer = self.registry.register(name, &email).unwrap();
        self.ledger
            .create_account(customer.id, Money::from_minor(deposit))
            .unwrap()
    }

    fn balance(&self, account: &Account) -> i64 {
        self.ledger.get_balance(account.id).unwrap().minor_units()
    }
}

#[test]
fn transfer_scenario_moves_funds_with_one_balanced_transaction() {
    let fixture = Fixture::new();
    let a = fixture.open("alice", 1000);
    let b = fixture.open("bob", 500);

    let transaction = fixture
        .ledger
        .transfer(a.id, b.id, Money::from_minor(300), None)
        .unwrap();

    assert_eq!(fixture.balance(&a), 700);
    assert_eq!(fixture.balance(&b), 800);
    assert_eq!(transaction.transaction_type, TransactionType::Transfer);
    assert_eq!(transaction.description.as_deref(), Some("Transfer between accounts"));
    assert_eq!(transaction.entries.len(), 2);
    assert_eq!(transaction.entries[0].entry_type, EntryType::Debit);
    assert_eq!(transaction.entries[0].account_id, a.id);
    assert_eq!(transaction.entries[0].amount, Money::from_minor(300));
    assert_eq!(transaction.entries[1].entry_type, EntryType::Credit);
    assert_eq!(transaction.entries[1].account_id, b.id);
    assert_eq!(transaction.entries[1].amount, Money::from_minor(300));
    assert_eq!(transaction.net_amount().unwrap(), Money::ZERO);

    let result = fixture
        .ledger
        .transfer(a.id, b.id, Money::from_minor(5000), None);
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
    assert_eq!(fixture.balance(&a), 700);
    assert_eq!(fixture.balance(&b), 800);

    fixture.ledger.audit().unwrap();
}

#[test]
fn rejected_amounts_write_no_entries() {
    let fixture = Fixture::new();
    let a = fixture.open("alice", 1000);
    let b = fixture.open("bob", 0);
    let before = fixture.ledger.audit().unwrap();

    for amount in [0, -1, -500] {
        let result = fixture
            .ledger
            .transfer(a.id, b.id, Money::from_minor(amount), None);
        assert!(matches!(result, Err(LedgerError::InvalidAmount { .. })));
    }

    let after = fixture.ledger.audit().unwrap();
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.transactions, before.transactions);
}

#[test]
fn concurrent_transfers_from_one_source_lose_no_update() {
    const TRANSFERS: usize = 50;
    const AMOUNT: i64 = 10;

    let fixture = Fixture::new();
    let source = fixture.open("alice", TRANSFERS as i64 * AMOUNT);
    let target = fixture.open("bob", 0);

    thread::scope(|scope| {
        for _ in 0..TRANSFERS {
            scope.spawn(|| {
                fixture
                    .ledger
                    .transfer(source.id, target.id, Money::from_minor(AMOUNT), None)
                    .unwrap();
            });
        }
    });

    assert_eq!(fixture.balance(&source), 0);
    assert_eq!(fixture.balance(&target), TRANSFERS as i64 * AMOUNT);

    let history = fixture
        .ledger
        .get_history(source.id, HistoryQuery::oldest_first().page(0, 500))
        .unwrap();
    assert_eq!(history.transactions.len(), TRANSFERS + 1);
    assert!(history.next.is_none());

    fixture.ledger.audit().unwrap();
}

#[test]
fn overdrawing_concurrently_commits_exactly_what_the_source_holds() {
    let fixture = Fixture::new();
    let source = fixture.open("alice", 100);
    let target = fixture.open("bob", 0);

    let successes: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..20)
            .map(|_| {
                scope.spawn(|| {
                    fixture
                        .ledger
                        .transfer(source.id, target.id, Money::from_minor(10), None)
                        .is_ok()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| usize::from(handle.join().unwrap()))
            .sum()
    });

    assert_eq!(successes, 10);
    assert_eq!(fixture.balance(&source), 0);
    assert_eq!(fixture.balance(&target), 100);
    fixture.ledger.audit().unwrap();
}

#[test]
fn disjoint_pairs_all_commit() {
    const PAIRS: usize = 8;
    const ROUNDS: i64 = 100;

    let fixture = Fixture::new();
    let pairs: Vec<(Account, Account)> = (0..PAIRS)
        .map(|pair| {
            (
                fixture.open(&format!("from{pair}"), ROUNDS),
                fixture.open(&format!("to{pair}"), 0),
            )
        })
        .collect();

    thread::scope(|scope| {
        for (from, to) in &pairs {
            let ledger = &fixture.ledger;
            scope.spawn(move || {
                for _ in 0..ROUNDS {
                    ledger
                        .transfer(from.id, to.id, Money::from_minor(1), None)
                        .unwrap();
                }
            });
        }
    });

    for (from, to) in &pairs {
        assert_eq!(fixture.balance(from), 0);
        assert_eq!(fixture.balance(to), ROUNDS);
    }
    fixture.ledger.audit().unwrap();
}

#[test]
fn verify_balance_is_consistent_during_concurrent_deposits() {
    const DEPOSITS: i64 = 5_000;

    let fixture = Fixture::new();
    let account = fixture.open("alice", 0);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..DEPOSITS {
                fixture
                    .ledger
                    .deposit(account.id, Money::from_minor(1), None)
                    .unwrap();
            }
            done.store(true, Ordering::Release);
        });

        while !done.load(Ordering::Acquire) {
            fixture.ledger.verify_balance(account.id).unwrap();
        }
    });

    assert_eq!(
        fixture.ledger.verify_balance(account.id).unwrap(),
        Money::from_minor(DEPOSITS)
    );
    fixture.ledger.audit().unwrap();
}

#[test]
fn opposite_transfers_do_not_deadlock() {
    let fixture = Fixture::new();
    let a = fixture.open("alice", 1000);
    let b = fixture.open("bob", 1000);

    thread::scope(|scope| {
        for forward in [true, false] {
            let ledger = &fixture.ledger;
            let (from, to) = if forward { (&a, &b) } else { (&b, &a) };
            scope.spawn(move || {
                for _ in 0..200 {
                    ledger
                        .transfer(from.id, to.id, Money::from_minor(1), None)
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(fixture.balance(&a), 1000);
    assert_eq!(fixture.balance(&b), 1000);
    fixture.ledger.audit().unwrap();
}

#[test]
fn concurrent_creations_get_gap_free_sequences() {
    let fixture = Fixture::new();
    let customer = fixture
        .registry
        .register("alice", "alice@example.com")
        .unwrap()
        .id;

    let mut accounts: Vec<Account> = thread::scope(|scope| {
        let handles: Vec<_> = (0..100)
            .map(|_| {
                let ledger = &fixture.ledger;
                scope.spawn(move || ledger.create_account(customer, Money::ZERO).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });
    accounts.sort_by_key(|account| account.id);

    let numbers: Vec<AccountNumber> = accounts
        .iter()
        .map(|account| AccountNumber::parse(&account.number).unwrap())
        .collect();

    let sequences: Vec<u32> = numbers.iter().map(|number| number.sequence).collect();
    assert_eq!(sequences, (1..=100).collect::<Vec<u32>>());
    assert!(numbers.iter().all(|number| number.date == date()));

    let mut unique: Vec<&str> = accounts.iter().map(|account| account.number.as_str()).collect();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 100);
}

#[test]
fn clearing_account_is_not_addressable() {
    let fixture = Fixture::new();
    let a = fixture.open("alice", 100);

    assert_eq!(
        fixture.ledger.get_account(CLEARING_ACCOUNT),
        Err(LedgerError::account_not_found(CLEARING_ACCOUNT))
    );
    assert!(matches!(
        fixture
            .ledger
            .transfer(a.id, CLEARING_ACCOUNT, Money::from_minor(10), None),
        Err(LedgerError::AccountNotFound { .. })
    ));

    let report = fixture.ledger.audit().unwrap();
    assert_eq!(report.customer_total, Money::from_minor(100));
    assert_eq!(report.clearing_balance, Money::from_minor(-100));
}

#[test]
fn lock_timeout_surfaces_after_retries() {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::on(date()));
    let registry = Arc::new(CustomerRegistry::new());
    let config = LedgerConfig {
        lock_timeout: Duration::from_millis(20),
        lock_retries: 1,
        retry_backoff: Duration::from_millis(1),
        ..LedgerConfig::default()
    };
    let ledger = Ledger::new(
        MemoryLedgerStore::new(Arc::clone(&clock), config.lock_timeout),
        registry.clone(),
        clock,
        Arc::new(SeededRandom::new(1)),
        config,
    );
    let customer = registry.register("alice", "alice@example.com").unwrap();
    let a = ledger.create_account(customer.id, Money::from_minor(100)).unwrap();
    let b = ledger.create_account(customer.id, Money::ZERO).unwrap();

    let (held_tx, held_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    thread::scope(|scope| {
        let store = ledger.store();
        scope.spawn(move || {
            store.with_exclusive_accounts(&[a.id], |_| {
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            })
        });

        held_rx.recv().unwrap();
        let result = ledger.transfer(a.id, b.id, Money::from_minor(10), None);
        assert!(matches!(result, Err(LedgerError::LockTimeout { .. })));
        release_tx.send(()).unwrap();
    });

    assert_eq!(ledger.get_balance(a.id).unwrap(), Money::from_minor(100));
}

#[derive(Debug, Clone)]
enum Step {
    Deposit(usize, i64),
    Withdraw(usize, i64),
    Transfer(usize, usize, i64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..4usize, -50..500i64).prop_map(|(account, amount)| Step::Deposit(account, amount)),
        (0..4usize, -50..500i64).prop_map(|(account, amount)| Step::Withdraw(account, amount)),
        (0..4usize, 0..4usize, -50..500i64)
            .prop_map(|(from, to, amount)| Step::Transfer(from, to, amount)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_workloads_keep_the_ledger_consistent(
        seeds in proptest::collection::vec(0..1_000i64, 4),
        steps in proptest::collection::vec(step(), 1..60),
    ) {
        let fixture = Fixture::new();
        let accounts: Vec<Account> = seeds
            .iter()
            .enumerate()
            .map(|(index, seed)| fixture.open(&format!("c{index}"), *seed))
            .collect();
        let mut expected: Vec<i64> = seeds.clone();

        for step in steps {
            match step {
                Step::Deposit(account, amount) => {
                    let result = fixture.ledger.deposit(accounts[account].id, Money::from_minor(amount), None);
                    prop_assert_eq!(result.is_ok(), amount > 0);
                    if result.is_ok() {
                        expected[account] += amount;
                    }
                }
                Step::Withdraw(account, amount) => {
                    let result = fixture.ledger.withdraw(accounts[account].id, Money::from_minor(amount), None);
                    prop_assert_eq!(result.is_ok(), amount > 0 && amount <= expected[account]);
                    if result.is_ok() {
                        expected[account] -= amount;
                    }
                }
                Step::Transfer(from, to, amount) => {
                    let result = fixture.ledger.transfer(
                        accounts[from].id,
                        accounts[to].id,
                        Money::from_minor(amount),
                        None,
                    );
                    let valid = from != to && amount > 0 && amount <= expected[from];
                    prop_assert_eq!(result.is_ok(), valid);
                    if valid {
                        expected[from] -= amount;
                        expected[to] += amount;
                    }
                }
            }
        }

        for (account, balance) in accounts.iter().zip(&expected) {
            prop_assert_eq!(fixture.balance(account), *balance);
            prop_assert_eq!(fixture.ledger.verify_balance(account.id).unwrap().minor_units(), *balance);
        }

        let report = fixture.ledger.audit().unwrap();
        prop_assert_eq!(report.customer_total.minor_units(), expected.iter().sum::<i64>());
        prop_assert_eq!(report.clearing_balance.minor_units(), -expected.iter().sum::<i64>());
    }
}
