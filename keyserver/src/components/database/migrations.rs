use schemerz_rusqlite::RusqliteMigration;

mod initial_setup;

pub(super) fn all() -> impl Iterator<Item = Box<dyn RusqliteMigration<Error = rusqlite::Error>>> {
    [
        // initial_setup
        Box::new(initial_setup::Migration {}) as _,
    ]
    .into_iter()
}
