// Tables with a fixed shape. Per-source staging tables and the link tables
// are addressed dynamically through sea-query and are not listed here.

diesel::table! {
    data_sources (name) {
        name -> Text,
        source_type -> Text,
        dataset -> Text,
        priority -> Integer,
        quality_score -> Double,
        coordinate_system -> Text,
        update_frequency -> Text,
        file_pattern -> Text,
        delimiter -> Nullable<Text>,
        registration_index -> Integer,
        definition_hash -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    staging_batches (batch_id) {
        batch_id -> Text,
        session_id -> Text,
        source_name -> Text,
        client_name -> Text,
        source_file -> Text,
        file_size -> BigInt,
        file_modified -> Nullable<Text>,
        upload_user -> Text,
        upload_timestamp -> Text,
        status -> Text,
        rows_seen -> BigInt,
        rows_loaded -> BigInt,
        rows_skipped -> BigInt,
        rows_errored -> BigInt,
        load_strategy -> Nullable<Text>,
        verification -> Nullable<Text>,
        error -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    master_gazetteer (id) {
        id -> BigInt,
        master_key -> Text,
        uprn -> Nullable<Text>,
        ba_reference -> Nullable<Text>,
        uarn -> Nullable<Text>,
        full_address -> Nullable<Text>,
        address_line_1 -> Nullable<Text>,
        address_line_2 -> Nullable<Text>,
        address_line_3 -> Nullable<Text>,
        locality -> Nullable<Text>,
        town -> Nullable<Text>,
        postcode -> Nullable<Text>,
        postcode_normalized -> Nullable<Text>,
        x_coordinate -> Nullable<Double>,
        y_coordinate -> Nullable<Double>,
        latitude -> Nullable<Double>,
        longitude -> Nullable<Double>,
        geometry -> Nullable<Text>,
        lad_code -> Nullable<Text>,
        ward_code -> Nullable<Text>,
        parish_code -> Nullable<Text>,
        lsoa_code -> Nullable<Text>,
        msoa_code -> Nullable<Text>,
        oa_code -> Nullable<Text>,
        category_code -> Nullable<Text>,
        property_description -> Nullable<Text>,
        rateable_value -> Nullable<Double>,
        forecast_rateable_value -> Nullable<Double>,
        effective_date -> Nullable<Text>,
        ratepayer_name -> Nullable<Text>,
        ratepayer_type -> Nullable<Text>,
        data_source -> Text,
        source_priority -> Nullable<Integer>,
        field_sources -> Text,
        data_quality_score -> Integer,
        last_source_update -> Nullable<Text>,
        duplicate_group_id -> Nullable<BigInt>,
        is_preferred_record -> Integer,
        is_active -> Integer,
        record_hash -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    schema_migrations (name) {
        name -> Text,
        content_hash -> Text,
        applied_at -> Text,
    }
}

diesel::table! {
    run_locks (name) {
        name -> Text,
        holder -> Text,
        acquired_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    data_sources,
    staging_batches,
    master_gazetteer,
    schema_migrations,
    run_locks,
);
