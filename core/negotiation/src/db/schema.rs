table! {
    negotiation (id) {
        id -> Text,
        initial_reward -> Text,
        attestation_topic -> Text,
        attestation_id -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

table! {
    negotiation_msg (uuid) {
        uuid -> Text,
        regarding_uuid -> Nullable<Text>,
        negotiation_id -> Text,
        future_topic -> Nullable<Text>,
        message_type -> Text,
        bid -> Nullable<Text>,
        reply_to -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

table! {
    whisper_filters (filter_id) {
        filter_id -> Text,
        entity -> Text,
        keypair_id -> Nullable<Text>,
        topic -> Text,
        created_at -> Timestamp,
    }
}

table! {
    attestation (id) {
        id -> Text,
        role -> Text,
        attestation_type -> Text,
        status -> Text,
        negotiation_id -> Nullable<Text>,
        subject -> Nullable<Text>,
        attester -> Nullable<Text>,
        requester -> Nullable<Text>,
        data -> Nullable<Text>,
        type_ids -> Nullable<Text>,
        subject_sig -> Nullable<Text>,
        requester_sig -> Nullable<Text>,
        payment_nonce -> Nullable<Text>,
        payment_sig -> Nullable<Text>,
        data_hash -> Nullable<Text>,
        request_nonce -> Nullable<Text>,
        reward -> Nullable<Text>,
        tx_hash -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    job (id) {
        id -> Integer,
        task_name -> Text,
        payload -> Text,
        state -> Text,
        attempts -> Integer,
        retry_limit -> Integer,
        run_after -> Timestamp,
        last_error -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

joinable!(negotiation_msg -> negotiation (negotiation_id));

allow_tables_to_appear_in_same_query!(negotiation, negotiation_msg, whisper_filters, attestation, job);
