diesel::table! {
    companies (id) {
        id -> Int8,
        name -> Text,
        active -> Bool,
        plan -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    leads (id) {
        id -> Int8,
        company_id -> Int8,
        name -> Text,
        phone -> Text,
        stage -> Nullable<Int4>,
        qualification -> Nullable<Text>,
        tags -> Array<Text>,
        origin -> Text,
        board_column_id -> Nullable<Int8>,
        board_position -> Nullable<Int4>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    messages (id) {
        id -> Int8,
        company_id -> Int8,
        session_id -> Nullable<Text>,
        message -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    resolved_conversations (id) {
        id -> Int8,
        company_id -> Int8,
        session_id -> Text,
        resolved_at -> Timestamptz,
    }
}

diesel::table! {
    followups (id) {
        id -> Int8,
        company_id -> Int8,
        lead_id -> Nullable<Int8>,
        phone -> Text,
        message -> Text,
        scheduled_for -> Timestamptz,
        status -> Text,
        error_detail -> Nullable<Text>,
        sent_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    memberships (id) {
        id -> Uuid,
        user_id -> Uuid,
        company_id -> Int8,
        email -> Text,
        role -> Text,
        scopes -> Array<Text>,
        active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    invites (id) {
        id -> Uuid,
        company_id -> Int8,
        email -> Text,
        role -> Text,
        token -> Text,
        status -> Text,
        used -> Bool,
        expires_at -> Timestamptz,
        used_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    audit_log (id) {
        id -> Uuid,
        company_id -> Int8,
        actor_id -> Nullable<Uuid>,
        action -> Text,
        target -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    lead_purges (id) {
        id -> Uuid,
        company_id -> Int8,
        phone -> Text,
        requested_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(leads -> companies (company_id));
diesel::joinable!(messages -> companies (company_id));
diesel::joinable!(memberships -> companies (company_id));
diesel::joinable!(invites -> companies (company_id));

diesel::allow_tables_to_appear_in_same_query!(
    companies,
    leads,
    messages,
    resolved_conversations,
    followups,
    memberships,
    invites,
    audit_log,
    lead_purges,
);
