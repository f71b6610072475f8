// Diesel table definitions. Kept in sync with repository::context::init_schema.

diesel::table! {
    documents (id) {
        id -> Text,
        content_hash -> Text,
        document_type -> Nullable<Text>,
        status -> Text,
        review_status -> Nullable<Text>,
        original_filename -> Nullable<Text>,
        mime_type -> Text,
        file_size -> BigInt,
        storage_path -> Text,
        classification -> Nullable<Text>,
        extracted_data -> Nullable<Text>,
        error_state -> Nullable<Text>,
        error_kind -> Nullable<Text>,
        error_cause -> Nullable<Text>,
        reviewed_by -> Nullable<Text>,
        reviewed_at -> Nullable<Text>,
        review_notes -> Nullable<Text>,
        run_token -> Nullable<Text>,
        last_run_token -> Nullable<Text>,
        version -> BigInt,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    extraction_sections (document_id, section) {
        document_id -> Text,
        section -> Text,
        run_token -> Text,
        payload -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    processing_events (id) {
        id -> BigInt,
        document_id -> Text,
        run_token -> Nullable<Text>,
        kind -> Text,
        stage -> Nullable<Text>,
        task -> Nullable<Text>,
        total_tasks -> Nullable<Integer>,
        message -> Text,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(documents, extraction_sections, processing_events);
