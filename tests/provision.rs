mod common;

use cinema_loader::{
    catalog,
    ddl::FkAction,
    inspect::foreign_key_rows,
    provision::{cinema_schema, dependency_order, provision_fixed},
};
use common::{TestWorkspace, open_with_foreign_keys};

const EXPECTED_FOREIGN_KEYS: &[(&str, &str, &str, FkAction)] = &[
    ("Booking", "fk_booking_show", "Show(show_id)", FkAction::Cascade),
    ("Booking", "fk_booking_user", "User(user_id)", FkAction::Cascade),
    ("FoodItemSize", "fk_fooditemsize_fooditem", "FoodItem(item_id)", FkAction::Cascade),
    ("FoodOrder", "fk_foodorder_booking", "Booking(booking_id)", FkAction::Cascade),
    ("FoodOrder", "fk_foodorder_screen", "Screen(screen_id)", FkAction::Cascade),
    ("FoodOrder", "fk_foodorder_seat", "Seat(seat_id)", FkAction::Cascade),
    ("FoodOrderItem", "fk_foodorderitem_fooditem", "FoodItem(item_id)", FkAction::Cascade),
    ("FoodOrderItem", "fk_foodorderitem_fooditemsize", "FoodItemSize(size_id)", FkAction::SetNull),
    ("FoodOrderItem", "fk_foodorderitem_foodorder", "FoodOrder(order_id)", FkAction::Cascade),
    ("Membership", "fk_membership_user", "User(user_id)", FkAction::Cascade),
    ("MovieCast", "fk_moviecast_movie", "Movie(movie_id)", FkAction::Cascade),
    ("Payment", "fk_payment_booking", "Booking(booking_id)", FkAction::Cascade),
    ("Payment", "fk_payment_gateway", "PaymentGateway(gateway_id)", FkAction::SetNull),
    ("PointsTransaction", "fk_pointstransaction_user", "User(user_id)", FkAction::Cascade),
    ("Review", "fk_review_movie", "Movie(movie_id)", FkAction::Cascade),
    ("Seat", "fk_seat_screen", "Screen(screen_id)", FkAction::Cascade),
    ("Show", "fk_show_movie", "Movie(movie_id)", FkAction::Cascade),
    ("Show", "fk_show_screen", "Screen(screen_id)", FkAction::Cascade),
    ("ShowSeat", "fk_showseat_seat", "Seat(seat_id)", FkAction::Cascade),
    ("ShowSeat", "fk_showseat_show", "Show(show_id)", FkAction::Cascade),
    ("Ticket", "fk_ticket_booking", "Booking(booking_id)", FkAction::Cascade),
    ("Ticket", "fk_ticket_showseat", "ShowSeat(show_seat_id)", FkAction::Cascade),
];

#[test]
fn provisions_all_tables_with_declared_foreign_keys() {
    let workspace = TestWorkspace::new();
    let conn = open_with_foreign_keys(&workspace.database());
    let report = provision_fixed(&conn, &cinema_schema()).expect("provision");
    assert!(report.is_complete());
    assert_eq!(report.created.len(), 18);

    let tables = catalog::list_tables(&conn).expect("tables");
    assert_eq!(tables.len(), 18);

    let keys = foreign_key_rows(&conn).expect("foreign keys");
    let actual: Vec<(&str, &str, &str, FkAction)> = keys
        .iter()
        .map(|key| {
            (
                key.table.as_str(),
                key.constraint.as_str(),
                key.references.as_str(),
                key.on_delete,
            )
        })
        .collect();
    assert_eq!(actual, EXPECTED_FOREIGN_KEYS);
    assert!(keys.iter().all(|key| key.on_update == FkAction::Cascade));
}

#[test]
fn second_provision_leaves_existing_tables_alone() {
    let workspace = TestWorkspace::new();
    let conn = open_with_foreign_keys(&workspace.database());
    provision_fixed(&conn, &cinema_schema()).expect("first provision");
    conn.execute("INSERT INTO Screen (name, class_type, capacity) VALUES ('Audi 1', 'IMAX', 120)", [])
        .expect("insert");

    let report = provision_fixed(&conn, &cinema_schema()).expect("second provision");
    assert!(report.created.is_empty());
    assert_eq!(report.existing.len(), 18);
    assert_eq!(catalog::row_count(&conn, "Screen").expect("count"), 1);
}

#[test]
fn parents_precede_children() {
    let schema = cinema_schema();
    let ordered = dependency_order(&schema).expect("order");
    let position = |name: &str| {
        ordered
            .iter()
            .position(|table| table.name == name)
            .expect("table present")
    };
    for table in &ordered {
        for parent in table.dependencies() {
            assert!(
                position(parent) < position(&table.name),
                "{parent} must precede {}",
                table.name
            );
        }
    }
    assert_eq!(ordered[0].name, "Screen");
}

#[test]
fn deleting_a_gateway_keeps_the_payment() {
    let workspace = TestWorkspace::new();
    let conn = open_with_foreign_keys(&workspace.database());
    provision_fixed(&conn, &cinema_schema()).expect("provision");
    conn.execute_batch(
        "INSERT INTO Screen (screen_id, name, class_type, capacity) VALUES (1, 'Audi 1', 'IMAX', 120);
         INSERT INTO Movie (movie_id, title, genre, rating, status) VALUES (1, 'Heat', 'Crime', 8.3, 'Now Showing');
         INSERT INTO Show (show_id, screen_id, movie_id, show_datetime) VALUES (1, 1, 1, '2024-05-01 18:00:00');
         INSERT INTO User (user_id, name, email) VALUES (1, 'Ana', 'ana@example.com');
         INSERT INTO Booking (booking_id, user_id, show_id, booking_datetime, total_cost)
             VALUES (1, 1, 1, '2024-04-28 10:15:00', 24.5);
         INSERT INTO PaymentGateway (gateway_id, name) VALUES (1, 'Stripe');
         INSERT INTO Payment (payment_id, booking_id, gateway_id, transaction_amount, transaction_datetime, status)
             VALUES (1, 1, 1, 24.5, '2024-04-28 10:16:00', 'SUCCESS');
         DELETE FROM PaymentGateway WHERE gateway_id = 1;",
    )
    .expect("seed and delete gateway");
    let gateway: Option<i64> = conn
        .query_row("SELECT gateway_id FROM Payment WHERE payment_id = 1", [], |row| row.get(0))
        .expect("payment survives");
    assert_eq!(gateway, None);

    conn.execute("DELETE FROM Booking WHERE booking_id = 1", [])
        .expect("delete booking");
    assert_eq!(catalog::row_count(&conn, "Payment").expect("count"), 0);
}
