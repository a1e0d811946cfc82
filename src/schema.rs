// ShipLog schema - cruise, device and cast tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    cruises (id) {
        id -> Integer,
        name -> Text,
        number -> Text,
        start_date -> Timestamp,
        end_date -> Nullable<Timestamp>,
    }
}

diesel::table! {
    events (id) {
        id -> Integer,
        name -> Text,
    }
}

diesel::table! {
    devices (id) {
        id -> Integer,
        name -> Text,
        parent_id -> Nullable<Integer>,
    }
}

diesel::table! {
    device_events (device_id, event_id) {
        device_id -> Integer,
        event_id -> Integer,
    }
}

diesel::table! {
    wires (id) {
        id -> Integer,
        name -> Text,
        serial_number -> Text,
    }
}

diesel::table! {
    configs (id) {
        id -> Integer,
        device_id -> Integer,
        wire_id -> Nullable<Integer>,
        winch -> Integer,
    }
}

diesel::table! {
    cruise_configs (cruise_id, config_id) {
        cruise_id -> Integer,
        config_id -> Integer,
    }
}

// ============================================================================
// Event Log Tables
// ============================================================================

diesel::table! {
    gps_fixes (id) {
        id -> Integer,
        latitude_degree -> Integer,
        latitude_minute -> Double,
        longitude_degree -> Integer,
        longitude_minute -> Double,
    }
}

diesel::table! {
    ship_logs (id) {
        id -> Integer,
        cruise_id -> Integer,
        device_id -> Integer,
        event_id -> Integer,
        gps_id -> Integer,
        timestamp -> Timestamp,
    }
}

// ============================================================================
// Derived Tables - casts and their winch statistics
// ============================================================================

diesel::table! {
    casts (id) {
        id -> Integer,
        cruise_id -> Integer,
        deployment_id -> Integer,
        recovery_id -> Integer,
        config_id -> Integer,
    }
}

diesel::table! {
    cast_reports (id) {
        id -> Integer,
        cast_id -> Integer,
        max_tension -> Nullable<Double>,   // lbs
        max_payout -> Nullable<Double>,    // meters
        max_speed -> Nullable<Double>,     // meters per minute
    }
}

diesel::table! {
    wire_reports (id) {
        id -> Integer,
        wire_id -> Integer,
        start_date -> Date,
        end_date -> Date,
        created_at -> Text,
    }
}
