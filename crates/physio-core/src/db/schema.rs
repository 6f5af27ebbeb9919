//! SQLite schema definition.

/// Complete database schema for the clinic.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    phone TEXT,
    cpf TEXT,
    birth_date TEXT,
    address TEXT,
    emergency_contact TEXT,
    emergency_phone TEXT,
    notes TEXT,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'inactive', 'completed')),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(name);

-- ============================================================================
-- Appointments
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL DEFAULT 60 CHECK (duration_minutes > 0),
    kind TEXT,
    status TEXT NOT NULL DEFAULT 'scheduled'
        CHECK (status IN ('scheduled', 'completed', 'cancelled', 'no_show')),
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id);
CREATE INDEX IF NOT EXISTS idx_appointments_date ON appointments(date, time);

-- ============================================================================
-- Medical Records and Evolutions
-- ============================================================================

CREATE TABLE IF NOT EXISTS medical_records (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'discharged')),
    chief_complaint TEXT NOT NULL,
    diagnosis TEXT,
    history TEXT,
    treatment_goals TEXT,
    discharge_notes TEXT,
    discharged_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- At most one active record per patient
CREATE UNIQUE INDEX IF NOT EXISTS idx_medical_records_one_active
    ON medical_records(patient_id) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS evolutions (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
    medical_record_id TEXT NOT NULL REFERENCES medical_records(id) ON DELETE RESTRICT,
    session_date TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    progress_score INTEGER NOT NULL CHECK (progress_score BETWEEN 0 AND 10),
    pain_level INTEGER CHECK (pain_level IS NULL OR pain_level BETWEEN 0 AND 10),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_evolutions_record ON evolutions(medical_record_id);

-- Evolutions only attach to the patient's own active record
CREATE TRIGGER IF NOT EXISTS evolutions_require_active_record BEFORE INSERT ON evolutions
BEGIN
    SELECT CASE
        WHEN NOT EXISTS (
            SELECT 1 FROM medical_records
            WHERE id = new.medical_record_id AND patient_id = new.patient_id
        ) THEN
            RAISE(ABORT, 'medical record not found for patient')
        WHEN (SELECT status FROM medical_records WHERE id = new.medical_record_id) <> 'active' THEN
            RAISE(ABORT, 'medical record is discharged')
    END;
END;

-- ============================================================================
-- Exercises and Treatment Plans
-- ============================================================================

CREATE TABLE IF NOT EXISTS exercises (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    category TEXT,
    description TEXT,
    difficulty TEXT NOT NULL DEFAULT 'beginner'
        CHECK (difficulty IN ('beginner', 'intermediate', 'advanced')),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS treatment_plans (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
    title TEXT NOT NULL,
    description TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT,
    progress_percentage INTEGER NOT NULL DEFAULT 0
        CHECK (progress_percentage BETWEEN 0 AND 100),
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'paused', 'completed')),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_treatment_plans_patient ON treatment_plans(patient_id);

CREATE TABLE IF NOT EXISTS plan_exercises (
    id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL REFERENCES treatment_plans(id) ON DELETE RESTRICT,
    exercise_id TEXT NOT NULL REFERENCES exercises(id) ON DELETE RESTRICT,
    sets INTEGER NOT NULL DEFAULT 3 CHECK (sets > 0),
    repetitions INTEGER NOT NULL DEFAULT 10 CHECK (repetitions > 0),
    frequency TEXT,
    completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_plan_exercises_plan ON plan_exercises(plan_id);

-- ============================================================================
-- Packages
-- ============================================================================

CREATE TABLE IF NOT EXISTS packages (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    price REAL NOT NULL CHECK (price >= 0),
    services TEXT NOT NULL DEFAULT '[]',         -- JSON array of strings
    sessions_included INTEGER NOT NULL DEFAULT 0,
    validity_days INTEGER NOT NULL CHECK (validity_days > 0),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS package_proposals (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
    package_id TEXT NOT NULL REFERENCES packages(id) ON DELETE RESTRICT,
    price REAL NOT NULL CHECK (price >= 0),
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'approved', 'rejected')),
    notes TEXT,
    decided_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS patient_packages (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
    package_id TEXT NOT NULL REFERENCES packages(id) ON DELETE RESTRICT,
    proposal_id TEXT NOT NULL UNIQUE REFERENCES package_proposals(id) ON DELETE RESTRICT,
    sessions_remaining INTEGER NOT NULL,
    purchased_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- ============================================================================
-- Finance
-- ============================================================================

CREATE TABLE IF NOT EXISTS financial_categories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
    created_at TEXT NOT NULL,
    UNIQUE (name, kind)
);

CREATE TABLE IF NOT EXISTS financial_transactions (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
    amount REAL NOT NULL CHECK (amount > 0),
    description TEXT NOT NULL,
    -- Categories in use cannot be deleted
    category_id TEXT REFERENCES financial_categories(id) ON DELETE RESTRICT,
    patient_id TEXT REFERENCES patients(id) ON DELETE RESTRICT,
    date TEXT NOT NULL,
    payment_method TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_date ON financial_transactions(date);
CREATE INDEX IF NOT EXISTS idx_transactions_category ON financial_transactions(category_id);

-- ============================================================================
-- Pre-evaluations
-- ============================================================================

CREATE TABLE IF NOT EXISTS pre_evaluations (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
    chief_complaint TEXT,
    pain_location TEXT,
    pain_intensity INTEGER CHECK (pain_intensity IS NULL OR pain_intensity BETWEEN 0 AND 10),
    symptom_duration TEXT,
    medical_history TEXT,
    medications TEXT,
    previous_treatments TEXT,
    lifestyle TEXT,
    goals TEXT,
    observations TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- ============================================================================
-- Accounts and Sessions
-- ============================================================================

CREATE TABLE IF NOT EXISTS staff_users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    role TEXT NOT NULL DEFAULT 'therapist'
        CHECK (role IN ('admin', 'therapist', 'receptionist')),
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS patient_access (
    patient_id TEXT PRIMARY KEY REFERENCES patients(id) ON DELETE RESTRICT,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('staff', 'patient')),
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO patients (id, name, created_at, updated_at) VALUES ('p1', 'Ana', 'now', 'now')",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_one_active_record_per_patient() {
        let conn = setup();
        let insert = "INSERT INTO medical_records (id, patient_id, status, chief_complaint, created_at, updated_at) \
                      VALUES (?1, 'p1', ?2, 'pain', 'now', 'now')";

        conn.execute(insert, ["r1", "active"]).unwrap();
        assert!(conn.execute(insert, ["r2", "active"]).is_err());

        // Discharged records do not count
        conn.execute(insert, ["r3", "discharged"]).unwrap();
    }

    #[test]
    fn test_evolution_trigger() {
        let conn = setup();
        conn.execute(
            "INSERT INTO medical_records (id, patient_id, status, chief_complaint, created_at, updated_at) \
             VALUES ('r1', 'p1', 'discharged', 'pain', 'now', 'now')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO evolutions (id, patient_id, medical_record_id, session_date, progress_score, created_at, updated_at) \
             VALUES ('e1', 'p1', 'r1', '2026-01-01', 5, 'now', 'now')",
            [],
        );
        assert!(result.is_err());

        let result = conn.execute(
            "INSERT INTO evolutions (id, patient_id, medical_record_id, session_date, progress_score, created_at, updated_at) \
             VALUES ('e2', 'p1', 'missing', '2026-01-01', 5, 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_category_in_use_cannot_be_deleted() {
        let conn = setup();
        conn.execute(
            "INSERT INTO financial_categories (id, name, kind, created_at) VALUES ('c1', 'Sessions', 'income', 'now')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO financial_transactions (id, kind, amount, description, category_id, date, created_at, updated_at) \
             VALUES ('t1', 'income', 100.0, 'Session', 'c1', '2026-01-01', 'now', 'now')",
            [],
        )
        .unwrap();

        assert!(conn
            .execute("DELETE FROM financial_categories WHERE id = 'c1'", [])
            .is_err());
    }
}
